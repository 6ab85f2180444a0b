//! Raw NMEA sentences used as APRS positions (`$GPRMC,...` and friends).

use super::position_report::parse_minutes;
use crate::position::{Position, fill_position};

/// What a `$` payload turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NmeaReport {
    /// Ultimeter weather station data (`$ULTW...`)
    Weather,
    Position(Position),
}

/// Read `DDMM.mmmm` (lat, `deg_digits` = 2) or `DDDMM.mmmm` (lon, 3) plus a
/// hemisphere field.
fn coordinate(
    field: &[u8],
    hemisphere: &[u8],
    deg_digits: usize,
    negative: u8,
    positive: u8,
) -> Option<f64> {
    if field.len() <= deg_digits || !field[..deg_digits].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let deg = field[..deg_digits]
        .iter()
        .fold(0u32, |acc, &b| acc * 10 + u32::from(b - b'0'));
    let min = parse_minutes(&field[deg_digits..])?;
    if min >= 60.0 {
        return None;
    }
    let limit = if deg_digits == 2 { 89 } else { 179 };
    if deg > limit {
        return None;
    }
    let value = f64::from(deg) + min / 60.0;
    match hemisphere.first().map(u8::to_ascii_uppercase) {
        Some(h) if h == positive => Some(value),
        Some(h) if h == negative => Some(-value),
        _ => None,
    }
}

/// Decode a `$` payload. `body` excludes the leading `$`.
pub fn decode_nmea(body: &[u8]) -> Option<NmeaReport> {
    if body.starts_with(b"ULT") {
        return Some(NmeaReport::Weather);
    }
    if body.len() < 10 {
        return None;
    }

    let fields: Vec<&[u8]> = body.split(|&b| b == b',').collect();
    // index of the latitude field within the sentence
    let lat_idx = match fields[0] {
        b"GPGGA" => 2,
        b"GPRMC" => {
            if fields.get(2).copied() != Some(b"A".as_slice()) {
                return None;
            }
            3
        }
        b"GPGLL" | b"GPWPL" => 1,
        b"PNTS" if fields.get(1).copied() == Some(b"1".as_slice()) => 7,
        _ => return None,
    };

    let lat = coordinate(fields.get(lat_idx)?, fields.get(lat_idx + 1)?, 2, b'S', b'N')?;
    let lon = coordinate(fields.get(lat_idx + 2)?, fields.get(lat_idx + 3)?, 3, b'W', b'E')?;
    fill_position(lat, lon).map(NmeaReport::Position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degrees(report: Option<NmeaReport>) -> (f64, f64) {
        match report {
            Some(NmeaReport::Position(p)) => (p.lat_degrees(), p.lon_degrees()),
            other => panic!("expected a position, got {:?}", other),
        }
    }

    #[test]
    fn gprmc() {
        let (lat, lon) = degrees(decode_nmea(
            b"GPRMC,063909,A,3349.4302,S,15112.1893,E,0.0,0.0,110106,,*0A",
        ));
        assert!((lat + (33.0 + 49.4302 / 60.0)).abs() < 1e-6);
        assert!((lon - (151.0 + 12.1893 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn gprmc_void_fix_rejected() {
        assert!(decode_nmea(b"GPRMC,063909,V,3349.4302,S,15112.1893,E,0.0,0.0,110106,,*0A").is_none());
    }

    #[test]
    fn gpgga() {
        let (lat, lon) = degrees(decode_nmea(
            b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
        ));
        assert!((lat - (48.0 + 7.038 / 60.0)).abs() < 1e-6);
        assert!((lon - (11.0 + 31.0 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn gpgll_and_gpwpl() {
        let (lat, lon) = degrees(decode_nmea(b"GPGLL,4916.45,N,12311.12,W,225444,A"));
        assert!((lat - (49.0 + 16.45 / 60.0)).abs() < 1e-6);
        assert!((lon + (123.0 + 11.12 / 60.0)).abs() < 1e-6);

        let (lat, _) = degrees(decode_nmea(b"GPWPL,4917.16,N,12310.64,W,003"));
        assert!((lat - (49.0 + 17.16 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn pnts() {
        let (lat, lon) = degrees(decode_nmea(
            b"PNTS,1,0,11,01,2002,231932,3539.687,N,13944.480,E,0,000,5,Roppongi UID RELAY,000,1*35",
        ));
        assert!((lat - (35.0 + 39.687 / 60.0)).abs() < 1e-6);
        assert!((lon - (139.0 + 44.480 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn ultimeter_is_weather() {
        assert_eq!(decode_nmea(b"ULTW0031003702CE0069----000086A0000"), Some(NmeaReport::Weather));
    }

    #[test]
    fn unknown_or_broken() {
        assert!(decode_nmea(b"GPXYZ,1,2,3,4,5,6").is_none());
        assert!(decode_nmea(b"GPGLL,4916.45,X,12311.12,W,225444,A").is_none());
        assert!(decode_nmea(b"GPGLL,9916.45,N,12311.12,W,225444,A").is_none());
        assert!(decode_nmea(b"GPGLL,4916.45,N").is_none());
    }
}
