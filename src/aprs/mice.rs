//! MIC-E position decoding.
//!
//! Latitude, the N/S and E/W flags and the longitude hundreds digit are
//! carried in the six characters of the destination call. The first bytes
//! of the information field hold longitude degrees, minutes and hundredths
//! as `byte - 28`, followed by speed/course and the symbol.

use super::position_report::{PositionFix, valid_sym_table_uncompressed};
use crate::position::fill_position;

pub const MICE_MIN_BODY_LEN: usize = 8;

/// Destination characters 0-2: digits, A-K (message bits), L, P-Z.
fn valid_dst_head(c: u8) -> bool {
    c.is_ascii_digit() || (b'A'..=b'L').contains(&c) || (b'P'..=b'Z').contains(&c)
}

/// Destination characters 3-5: digits, L, P-Z.
fn valid_dst_tail(c: u8) -> bool {
    c.is_ascii_digit() || c == b'L' || (b'P'..=b'Z').contains(&c)
}

/// Map a destination character to its latitude digit, `b' '` for the
/// ambiguity placeholders K, L and Z.
fn dst_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c,
        b'A'..=b'J' => c - b'A' + b'0',
        b'P'..=b'Y' => c - b'P' + b'0',
        _ => b' ',
    }
}

fn valid_body(body: &[u8]) -> bool {
    (0x26..=0x7f).contains(&body[0])
        && (0x26..=0x61).contains(&body[1])
        && (0x1c..=0x7f).contains(&body[2])
        && (0x1c..=0x7f).contains(&body[3])
        && (0x1c..=0x7d).contains(&body[4])
        && (0x1c..=0x7f).contains(&body[5])
        && ((0x21..=0x7b).contains(&body[6]) || body[6] == 0x7d)
        && valid_sym_table_uncompressed(body[7])
}

fn two_digits(d: &[u8]) -> f64 {
    f64::from((d[0] - b'0') * 10 + (d[1] - b'0'))
}

/// Decode a MIC-E report.
///
/// `dstcall` is the destination call without SSID and `body` is the
/// information field after the `'` or `` ` `` type byte.
pub fn decode_mice(dstcall: &[u8], body: &[u8]) -> Option<PositionFix> {
    if body.len() < MICE_MIN_BODY_LEN || dstcall.len() != 6 {
        return None;
    }
    if !dstcall[..3].iter().all(|&c| valid_dst_head(c))
        || !dstcall[3..].iter().all(|&c| valid_dst_tail(c))
        || !valid_body(body)
    {
        return None;
    }

    let mut digits = [0u8; 6];
    for (d, &c) in digits.iter_mut().zip(dstcall) {
        *d = dst_digit(c);
    }

    // Ambiguity hides digits from the right; degrees can never be hidden.
    let mut ambiguity = 0;
    for (idx, fill, level) in [(5, b'5', 1), (4, b'5', 2), (3, b'5', 3), (2, b'3', 4)] {
        if digits[idx] == b' ' {
            digits[idx] = fill;
            ambiguity = level;
        }
    }
    if digits[0] == b' ' || digits[1] == b' ' {
        return None;
    }

    let mut lat =
        two_digits(&digits[0..2]) + two_digits(&digits[2..4]) / 60.0 + two_digits(&digits[4..6]) / 6000.0;
    if dstcall[3] <= 0x4c {
        lat = -lat;
    }

    let mut lon_deg = i32::from(body[0]) - 28;
    if dstcall[4] >= 0x50 {
        lon_deg += 100;
    }
    if (180..=189).contains(&lon_deg) {
        lon_deg -= 80;
    } else if (190..=199).contains(&lon_deg) {
        lon_deg -= 190;
    }

    let mut lon_min = i32::from(body[1]) - 28;
    if lon_min >= 60 {
        lon_min -= 60;
    }
    let lon_frag = i32::from(body[2]) - 28;

    let deg = f64::from(lon_deg);
    let mut lon = match ambiguity {
        0 => deg + f64::from(lon_min) / 60.0 + f64::from(lon_frag) / 6000.0,
        1 => deg + f64::from(lon_min) / 60.0 + f64::from(lon_frag - lon_frag % 10 + 5) / 6000.0,
        2 => deg + (f64::from(lon_min) + 0.5) / 60.0,
        3 => deg + f64::from(lon_min - lon_min % 10 + 5) / 60.0,
        _ => deg + 0.5,
    };
    if dstcall[5] >= 0x50 {
        lon = -lon;
    }

    Some(PositionFix {
        position: fill_position(lat, lon)?,
        symbol: [body[7], body[6]],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn southern_eastern() {
        let fix = decode_mice(b"SX15S6", b"I',l \x1c>/]").unwrap();
        assert!((fix.position.lat_degrees() + 38.2560).abs() < 1e-4);
        assert!((fix.position.lon_degrees() - 145.1860).abs() < 1e-4);
        assert_eq!(&fix.symbol, b"/>");
    }

    #[test]
    fn northern_western() {
        let fix = decode_mice(b"TQ4W2V", b"c51!f?>/]\"3x}=").unwrap();
        assert!((fix.position.lat_degrees() - 41.78767).abs() < 1e-4);
        assert!((fix.position.lon_degrees() + 71.42017).abs() < 1e-4);
        assert_eq!(&fix.symbol, b"/>");
    }

    #[test]
    fn ambiguity_degrades_precision() {
        // last digit hidden: lat minutes 15.3_ -> 15.35, Z also flags west
        let fix = decode_mice(b"SX15SZ", b"I',l \x1c>/]").unwrap();
        assert!((fix.position.lat_degrees() + (38.0 + 15.0 / 60.0 + 35.0 / 6000.0)).abs() < 1e-6);
        let expect_lon = 145.0 + 11.0 / 60.0 + 15.0 / 6000.0;
        assert!((fix.position.lon_degrees() + expect_lon).abs() < 1e-6);

        // four digits hidden: minutes become 35.55, longitude keeps degrees only
        let fix = decode_mice(b"SXKLZZ", b"I',l \x1c>/]").unwrap();
        let expect_lat = 38.0 + 35.0 / 60.0 + 55.0 / 6000.0;
        assert!((fix.position.lat_degrees() + expect_lat).abs() < 1e-6);
        assert!((fix.position.lon_degrees() + 145.5).abs() < 1e-6);
    }

    #[test]
    fn hidden_degrees_rejected() {
        assert!(decode_mice(b"SK15S6", b"I',l \x1c>/]").is_none());
    }

    #[test]
    fn rejects_bad_input() {
        // short body
        assert!(decode_mice(b"SX15S6", b"I',l \x1c>").is_none());
        // destination not six characters
        assert!(decode_mice(b"SX15S", b"I',l \x1c>/]").is_none());
        // M is not a valid head character
        assert!(decode_mice(b"MX15S6", b"I',l \x1c>/]").is_none());
        // A is not valid in the tail
        assert!(decode_mice(b"SX1AS6", b"I',l \x1c>/]").is_none());
        // longitude minutes byte out of range
        assert!(decode_mice(b"SX15S6", b"Ib,l \x1c>/]").is_none());
        // bad symbol table
        assert!(decode_mice(b"SX15S6", b"I',l \x1c>!]").is_none());
    }

    #[test]
    fn longitude_wrap_bands() {
        // byte0 'w' (119) - 28 = 91, +100 = 191 -> 1 degree
        let fix = decode_mice(b"SX15S6", b"w',l \x1c>/]").unwrap();
        assert!((fix.position.lon_degrees() - (1.0 + 11.0 / 60.0 + 16.0 / 6000.0)).abs() < 1e-6);
        // byte0 'l' (108) - 28 = 80, +100 = 180 -> 100 degrees
        let fix = decode_mice(b"SX15S6", b"l',l \x1c>/]").unwrap();
        assert!((fix.position.lon_degrees() - (100.0 + 11.0 / 60.0 + 16.0 / 6000.0)).abs() < 1e-6);
    }
}
