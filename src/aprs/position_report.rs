//! Plain APRS position reports: uncompressed `DDMM.hhN/DDDMM.hhW$` and
//! base-91 compressed `/YYYYXXXX$csT`.

use crate::position::{Position, fill_position};

pub const UNCOMPRESSED_LEN: usize = 19;
pub const COMPRESSED_LEN: usize = 13;

const COMPRESSED_LAT_DIVISOR: f64 = 380_926.0;
const COMPRESSED_LON_DIVISOR: f64 = 190_463.0;

/// A decoded position with its symbol (table, code).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub position: Position,
    pub symbol: [u8; 2],
}

pub fn valid_sym_table_uncompressed(c: u8) -> bool {
    c == b'/' || c == b'\\' || c.is_ascii_uppercase() || c.is_ascii_digit()
}

pub fn valid_sym_table_compressed(c: u8) -> bool {
    c == b'/' || c == b'\\' || c.is_ascii_uppercase() || (b'a'..=b'j').contains(&c)
}

/// Parse `digits` ASCII digits as an unsigned number.
fn parse_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        bytes
            .iter()
            .fold(0u32, |acc, &b| acc * 10 + u32::from(b - b'0')),
    )
}

/// Parse decimal minutes like `03.50`. Digits and one dot only.
pub(crate) fn parse_minutes(bytes: &[u8]) -> Option<f64> {
    if bytes.is_empty()
        || !bytes.iter().all(|&b| b.is_ascii_digit() || b == b'.')
        || bytes.iter().filter(|&&b| b == b'.').count() > 1
    {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Decode 19 bytes of `DDMM.hhH<table>DDDMM.hhH<code>`.
///
/// Spaces in the low digits mean position ambiguity; they are replaced with
/// the middle of the ambiguous range before parsing.
pub fn decode_uncompressed(body: &[u8]) -> Option<PositionFix> {
    let mut pos: [u8; UNCOMPRESSED_LEN] = body.get(..UNCOMPRESSED_LEN)?.try_into().ok()?;

    for (idx, fill) in [(2, b'3'), (3, b'5'), (5, b'5'), (6, b'5')] {
        if pos[idx] == b' ' {
            pos[idx] = fill;
        }
        if pos[idx + 10] == b' ' {
            pos[idx + 10] = fill;
        }
    }

    let sym_table = pos[8];
    let sym_code = pos[18];
    if !valid_sym_table_uncompressed(sym_table) {
        return None;
    }

    let lat_deg = parse_digits(&pos[0..2])?;
    let lat_min = parse_minutes(&pos[2..7])?;
    let lon_deg = parse_digits(&pos[9..12])?;
    let lon_min = parse_minutes(&pos[12..17])?;
    if lat_deg > 89 || lon_deg > 179 {
        return None;
    }

    let mut lat = f64::from(lat_deg) + lat_min / 60.0;
    let mut lon = f64::from(lon_deg) + lon_min / 60.0;
    match pos[7].to_ascii_uppercase() {
        b'N' => {}
        b'S' => lat = -lat,
        _ => return None,
    }
    match pos[17].to_ascii_uppercase() {
        b'E' => {}
        b'W' => lon = -lon,
        _ => return None,
    }

    Some(PositionFix {
        position: fill_position(lat, lon)?,
        symbol: [sym_table, sym_code],
    })
}

fn base91(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, &b| {
        if !(0x21..=0x7b).contains(&b) {
            return None;
        }
        Some(acc * 91 + u32::from(b - 33))
    })
}

/// Decode a 13-byte compressed position: table, 4 lat digits, 4 lon digits,
/// symbol code, course/speed and type bytes.
pub fn decode_compressed(body: &[u8]) -> Option<PositionFix> {
    let body = body.get(..COMPRESSED_LEN)?;
    let mut sym_table = body[0];
    let sym_code = body[9];
    if !valid_sym_table_compressed(sym_table) {
        return None;
    }
    // a-j stand for overlay digits 0-9
    if sym_table.is_ascii_lowercase() {
        sym_table = sym_table - b'a' + b'0';
    }

    let lat = 90.0 - f64::from(base91(&body[1..5])?) / COMPRESSED_LAT_DIVISOR;
    let lon = -180.0 + f64::from(base91(&body[5..9])?) / COMPRESSED_LON_DIVISOR;

    Some(PositionFix {
        position: fill_position(lat, lon)?,
        symbol: [sym_table, sym_code],
    })
}

/// Pick compressed or uncompressed by the first byte and decode.
pub fn decode_position_body(body: &[u8]) -> Option<PositionFix> {
    let first = *body.first()?;
    if first.is_ascii_digit() {
        decode_uncompressed(body)
    } else if valid_sym_table_compressed(first) {
        decode_compressed(body)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degrees(fix: &PositionFix) -> (f64, f64) {
        (fix.position.lat_degrees(), fix.position.lon_degrees())
    }

    #[test]
    fn uncompressed_basic() {
        let fix = decode_uncompressed(b"4903.50N/07201.75W-").unwrap();
        let (lat, lon) = degrees(&fix);
        assert!((lat - 49.058333).abs() < 1e-4);
        assert!((lon + 72.029167).abs() < 1e-4);
        assert_eq!(&fix.symbol, b"/-");
    }

    #[test]
    fn uncompressed_lowercase_hemisphere() {
        let fix = decode_uncompressed(b"3351.00s\\15112.00e>").unwrap();
        let (lat, lon) = degrees(&fix);
        assert!((lat + 33.85).abs() < 1e-4);
        assert!((lon - 151.2).abs() < 1e-4);
        assert_eq!(&fix.symbol, b"\\>");
    }

    #[test]
    fn uncompressed_ambiguity() {
        // two digits of ambiguity: 49 03.55 becomes 49 0_._ _ -> 4905.55
        let fix = decode_uncompressed(b"490 .  N/0720 .  W-").unwrap();
        let (lat, lon) = degrees(&fix);
        assert!((lat - (49.0 + 5.55 / 60.0)).abs() < 1e-6);
        assert!((lon + (72.0 + 5.55 / 60.0)).abs() < 1e-6);

        let fix = decode_uncompressed(b"49  .  N/072  .  W-").unwrap();
        let (lat, _) = degrees(&fix);
        assert!((lat - (49.0 + 35.55 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn uncompressed_rejects() {
        assert!(decode_uncompressed(b"9103.50N/07201.75W-").is_none());
        assert!(decode_uncompressed(b"4903.50N/18201.75W-").is_none());
        assert!(decode_uncompressed(b"4903.50X/07201.75W-").is_none());
        assert!(decode_uncompressed(b"4903.50N/07201.75Q-").is_none());
        assert!(decode_uncompressed(b"4903.50N!07201.75W-").is_none());
        assert!(decode_uncompressed(b"4903.50N/07201.75W").is_none());
        assert!(decode_uncompressed(b"49x3.50N/07201.75W-").is_none());
    }

    #[test]
    fn compressed_basic() {
        let fix = decode_compressed(b"/5L!!<*e7>7P ").unwrap();
        let (lat, lon) = degrees(&fix);
        assert!((lat - 49.5).abs() < 1e-4);
        assert!((lon + 72.75).abs() < 1e-4);
        assert_eq!(&fix.symbol, b"/>");
    }

    #[test]
    fn compressed_overlay_table() {
        let fix = decode_compressed(b"c5L!!<*e7>7P ").unwrap();
        assert_eq!(&fix.symbol, b"2>");
    }

    #[test]
    fn compressed_rejects_out_of_range_digits() {
        assert!(decode_compressed(b"/5L!\x20<*e7>7P ").is_none());
        assert!(decode_compressed(b"/5L!!<*e|>7P ").is_none());
        assert!(decode_compressed(b"/5L!!<*e7>7P").is_none());
        assert!(decode_compressed(b"!5L!!<*e7>7P ").is_none());
    }

    #[test]
    fn dispatch_by_first_byte() {
        assert!(decode_position_body(b"4903.50N/07201.75W-").is_some());
        assert!(decode_position_body(b"/5L!!<*e7>7P ").is_some());
        assert!(decode_position_body(b" 903.50N/07201.75W-").is_none());
        assert!(decode_position_body(b"").is_none());
    }
}
