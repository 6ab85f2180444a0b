use aprs_gateway::aprs::classify_and_decode;
use aprs_gateway::aprs::position_report::decode_compressed;
use aprs_gateway::position::fill_position;
use aprs_gateway::PacketType;

const EPSILON: f64 = 1e-4;

fn decode(info: &[u8]) -> aprs_gateway::aprs::Decoded {
    classify_and_decode(b"OH2XYZ", b"APRS", info)
}

fn assert_position(info: &[u8], lat: f64, lon: f64) {
    let decoded = decode(info);
    let position = decoded
        .position
        .unwrap_or_else(|| panic!("no position in {:?}", String::from_utf8_lossy(info)));
    assert!(
        (position.lat_degrees() - lat).abs() < EPSILON,
        "lat {} != {} for {:?}",
        position.lat_degrees(),
        lat,
        String::from_utf8_lossy(info)
    );
    assert!(
        (position.lon_degrees() - lon).abs() < EPSILON,
        "lon {} != {} for {:?}",
        position.lon_degrees(),
        lon,
        String::from_utf8_lossy(info)
    );
}

#[test]
fn uncompressed_vectors() {
    assert_position(b"!4903.50N/07201.75W-Test 001234", 49.0583, -72.0292);
    assert_position(b"=4903.50S\\07201.75E-", -49.0583, 72.0292);
    assert_position(b"@092345z4903.50N/07201.75W>", 49.0583, -72.0292);
    assert_position(b"/092345h6010.00n/02455.00e>", 60.1667, 24.9167);
}

#[test]
fn compressed_vectors() {
    let cases: [(&[u8], f64, f64); 3] = [
        (b"/5L!!<*e7>7P ", 49.5, -72.75),
        (b"!/5L!!<*e7>7P ", 49.5, -72.75),
        (b"=/5L!!<*e7OS]S", 49.5, -72.75),
    ];
    for (info, lat, lon) in cases {
        if info[0] == b'/' {
            let fix = decode_compressed(info).unwrap();
            assert!((fix.position.lat_degrees() - lat).abs() < EPSILON);
            assert!((fix.position.lon_degrees() - lon).abs() < EPSILON);
            assert_eq!(&fix.symbol, b"/>");
        } else {
            assert_position(info, lat, lon);
        }
    }
}

#[test]
fn compressed_rejects_bytes_outside_base91() {
    // '|' (0x7C) is one past the base-91 range
    assert!(decode_compressed(b"/5L!|<*e7>7P ").is_none());
    assert!(decode_compressed(b"/5L! <*e7>7P ").is_none());
    assert!(decode(b"!/5L!|<*e7>7P ").position.is_none());
}

#[test]
fn mice_vectors() {
    let decoded = classify_and_decode(b"OH7LZB-13", b"SX15S6", b"'I',l \x1c>/]");
    assert_eq!(decoded.packet_type, PacketType::POSITION);
    let position = decoded.position.unwrap();
    assert!((position.lat_degrees() + 38.2560).abs() < EPSILON);
    assert!((position.lon_degrees() - 145.1860).abs() < EPSILON);

    let decoded = classify_and_decode(b"OH2XYZ", b"TQ4W2V", b"`c51!f?>/]\"3x}=");
    let position = decoded.position.unwrap();
    assert!((position.lat_degrees() - 41.78767).abs() < EPSILON);
    assert!((position.lon_degrees() + 71.42017).abs() < EPSILON);
}

#[test]
fn nmea_vectors() {
    assert_position(
        b"$GPRMC,063909,A,3349.4302,N,11700.3721,W,43.022,89.3,291099,13.6,E*52",
        33.0 + 49.4302 / 60.0,
        -(117.0 + 0.3721 / 60.0),
    );
    assert_position(
        b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
        48.1173,
        11.5167,
    );
    let decoded = decode(b"$GPRMC,063909,V,3349.4302,N,11700.3721,W,43.022,89.3,291099,13.6,E*52");
    assert!(decoded.position.is_none());
    // NMEA carries no symbol
    assert_eq!(&decode(b"$GPGLL,4916.45,N,12311.12,W,225444,A").symbol, b"  ");
}

#[test]
fn null_island_rejected_by_every_decoder() {
    assert!(fill_position(0.00005, 0.00005).is_none());
    assert!(decode(b"!0000.00N/00000.00E-").position.is_none());
    assert!(decode(b"$GPGLL,0000.0000,N,00000.0000,E,225444,A").position.is_none());
    assert!(fill_position(90.0, 0.0).is_none());
    assert!(fill_position(60.0, 25.0).is_some());
}

#[test]
fn classification_without_position() {
    let cases: [(&[u8], PacketType); 8] = [
        (b">on the air", PacketType::STATUS),
        (b"<IGATE,MSG_CNT=3", PacketType::STATCAPA),
        (b"?IGATE?", PacketType::QUERY),
        (b"T#123,100,200,300,400,500,00000000", PacketType::TELEMETRY),
        (b"#W1", PacketType::WX),
        (b"*12345", PacketType::WX),
        (b"{{private", PacketType::USERDEF),
        (b":OH2ABC   :ack12", PacketType::MESSAGE),
    ];
    for (info, expected) in cases {
        let decoded = decode(info);
        assert_eq!(
            decoded.packet_type,
            expected,
            "{:?}",
            String::from_utf8_lossy(info)
        );
        assert!(decoded.position.is_none());
        assert!(decoded.packet_type.is_consistent());
    }
}

#[test]
fn weather_symbol_marks_wx() {
    let decoded = decode(b"@092345z4903.50N/07201.75W_220/004g005t077");
    assert_eq!(decoded.packet_type, PacketType::POSITION | PacketType::WX);
    let decoded = decode(b"!4903.50N\\07201.75W@");
    assert!(decoded.packet_type.contains(PacketType::WX));
}

#[test]
fn unrecognised_payload_is_not_aprs() {
    let decoded = decode(b"hello world");
    assert!(!decoded.is_aprs());
    assert!(decoded.position.is_none());
}
