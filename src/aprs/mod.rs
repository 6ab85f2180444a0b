//! APRS information field classification and position decoding.
//!
//! Dispatch is on the first byte of the information field. Each position
//! encoding has its own module; everything ends up as a [`Decoded`] record
//! that the gateway copies into the packet.

pub mod mice;
pub mod nmea;
pub mod object;
pub mod position_report;

use tracing::trace;

use crate::ax25::is_ui_frame;
use crate::packet_buffer::PacketMut;
use crate::packet_type::PacketType;
use crate::position::Position;

use self::mice::decode_mice;
use self::nmea::{NmeaReport, decode_nmea};
use self::object::{MessageKind, parse_item, parse_message, parse_object};
use self::position_report::{PositionFix, decode_position_body};

/// How far into a malformed packet to look for a stray `!` position.
const STRAY_POSITION_SCAN_LEN: usize = 39;

/// Timestamp length on `/` and `@` position reports.
const POSITION_TIMESTAMP_LEN: usize = 7;

/// Result of decoding one information field.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub packet_type: PacketType,
    pub position: Option<Position>,
    /// Symbol table and code, spaces when unknown
    pub symbol: [u8; 2],
    /// Object or item name
    pub name: Option<String>,
    /// Object or item was killed
    pub killed: bool,
    /// Message addressee
    pub recipient: Option<String>,
}

impl Default for Decoded {
    fn default() -> Self {
        Self {
            packet_type: PacketType::empty(),
            position: None,
            symbol: [b' ', b' '],
            name: None,
            killed: false,
            recipient: None,
        }
    }
}

impl Decoded {
    /// Something in the payload was recognised as APRS.
    pub fn is_aprs(&self) -> bool {
        !self.packet_type.is_empty()
    }

    fn set_fix(&mut self, fix: PositionFix, kind: PacketType) {
        self.packet_type |= kind;
        self.position = Some(fix.position);
        self.symbol = fix.symbol;
        if matches!(&fix.symbol, b"/_" | b"\\_" | b"/@" | b"\\@") {
            self.packet_type |= PacketType::WX;
        }
    }
}

/// CWOP weather stations use `CW`, `DW` or `EW` followed by digits.
fn is_cwop_call(srccall: &[u8]) -> bool {
    let base = match srccall.iter().position(|&b| b == b'-') {
        Some(dash) => &srccall[..dash],
        None => srccall,
    };
    base.len() > 2
        && matches!(base[0], b'C' | b'D' | b'E')
        && base[1] == b'W'
        && base[2..].iter().all(u8::is_ascii_digit)
}

/// Classify an information field and decode any position in it.
///
/// `dstcall_base` is the destination call without SSID, needed for MIC-E;
/// `srccall` is used for CWOP detection.
pub fn classify_and_decode(srccall: &[u8], dstcall_base: &[u8], info: &[u8]) -> Decoded {
    let mut decoded = Decoded::default();
    if is_cwop_call(srccall) {
        decoded.packet_type |= PacketType::CWOP;
    }
    let Some((&kind, body)) = info.split_first() else {
        return decoded;
    };

    match kind {
        b'\'' | b'`' => {
            if let Some(fix) = decode_mice(dstcall_base, body) {
                decoded.set_fix(fix, PacketType::POSITION);
            }
        }
        b'!' if body.first() == Some(&b'!') => {
            // Ultimeter 2000 data logging mode
            decoded.packet_type |= PacketType::WX;
        }
        b'!' | b'=' => {
            if let Some(fix) = decode_position_body(body) {
                decoded.set_fix(fix, PacketType::POSITION);
            }
        }
        b'/' | b'@' => {
            if let Some(fix) = body
                .get(POSITION_TIMESTAMP_LEN..)
                .and_then(decode_position_body)
            {
                decoded.set_fix(fix, PacketType::POSITION);
            }
        }
        b'$' => match decode_nmea(body) {
            Some(NmeaReport::Weather) => decoded.packet_type |= PacketType::WX,
            Some(NmeaReport::Position(position)) => {
                decoded.packet_type |= PacketType::POSITION;
                decoded.position = Some(position);
            }
            None => {}
        },
        b';' => {
            if let Some(object) = parse_object(body) {
                decoded.packet_type |= PacketType::OBJECT;
                if let Some(fix) = decode_position_body(object.position) {
                    decoded.set_fix(fix, PacketType::OBJECT);
                }
                decoded.name = Some(object.name);
                decoded.killed = object.killed;
            }
        }
        b')' => {
            if let Some(item) = parse_item(body) {
                decoded.packet_type |= PacketType::ITEM;
                if let Some(fix) = decode_position_body(item.position) {
                    decoded.set_fix(fix, PacketType::ITEM);
                }
                decoded.name = Some(item.name);
                decoded.killed = item.killed;
            }
        }
        b':' => match parse_message(body) {
            Some(MessageKind::Message { recipient, nws }) => {
                decoded.packet_type |= PacketType::MESSAGE;
                if nws {
                    decoded.packet_type |= PacketType::NWS;
                }
                decoded.recipient = Some(recipient);
            }
            Some(MessageKind::Telemetry) => decoded.packet_type |= PacketType::TELEMETRY,
            Some(MessageKind::Query) => decoded.packet_type |= PacketType::QUERY,
            // addressee field not `:`-terminated at column 9
            None => decoded.packet_type |= PacketType::MESSAGE,
        },
        b'>' => decoded.packet_type |= PacketType::STATUS,
        b'<' => decoded.packet_type |= PacketType::STATCAPA,
        b'?' => decoded.packet_type |= PacketType::QUERY,
        b'T' => decoded.packet_type |= PacketType::TELEMETRY,
        b'#' | b'*' | b'_' => decoded.packet_type |= PacketType::WX,
        b'{' => decoded.packet_type |= PacketType::USERDEF,
        b'}' => decoded.packet_type |= PacketType::THIRDPARTY,
        _ => {
            // Broken TNCs prepend junk; look for a position further in.
            let scan = &info[..info.len().min(STRAY_POSITION_SCAN_LEN + 1)];
            if let Some(bang) = scan.iter().position(|&b| b == b'!')
                && let Some(fix) = decode_position_body(&info[bang + 1..])
            {
                trace!("Position found at offset {} of unrecognised payload", bang);
                decoded.set_fix(fix, PacketType::POSITION);
            }
        }
    }

    debug_assert!(decoded.packet_type.is_consistent());
    decoded
}

/// Decode the packet's information field and store the results in it.
pub fn decode_packet(packet: &mut PacketMut) {
    let decoded = classify_and_decode(
        packet.srccall(),
        packet.header().dstcall_base(packet.tnc2()),
        packet.info(),
    );
    packet.is_aprs = decoded.is_aprs();
    // APRS-IS lines without an AX.25 form count as UI frames
    packet.digi_like_aprs =
        packet.is_aprs || packet.ax25().is_empty() || is_ui_frame(packet.ax25());
    packet.packet_type = decoded.packet_type;
    packet.symbol = decoded.symbol;
    packet.name = decoded.name;
    packet.killed = decoded.killed;
    packet.recipient = decoded.recipient;
    packet.set_position(decoded.position);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(info: &[u8]) -> Decoded {
        classify_and_decode(b"OH2XYZ", b"APRS", info)
    }

    #[test]
    fn plain_position() {
        let d = decode(b"!4903.50N/07201.75W-Test 001234");
        assert_eq!(d.packet_type, PacketType::POSITION);
        assert!(d.position.is_some());
        assert_eq!(&d.symbol, b"/-");
    }

    #[test]
    fn timestamped_position() {
        let d = decode(b"@092345z4903.50N/07201.75W>");
        assert_eq!(d.packet_type, PacketType::POSITION);
        let d = decode(b"/092345z/5L!!<*e7>7P ");
        assert_eq!(d.packet_type, PacketType::POSITION);
    }

    #[test]
    fn weather_symbol_adds_wx() {
        let d = decode(b"=4903.50N/07201.75W_220/004g005t077r000p000P000h50b09900");
        assert_eq!(d.packet_type, PacketType::POSITION | PacketType::WX);
    }

    #[test]
    fn bad_position_still_classified_nothing() {
        let d = decode(b"!garbage");
        assert!(d.position.is_none());
        assert!(!d.is_aprs());
    }

    #[test]
    fn ultimeter() {
        assert_eq!(decode(b"!!0000005B00000000").packet_type, PacketType::WX);
        assert_eq!(decode(b"$ULTW0031003702CE").packet_type, PacketType::WX);
    }

    #[test]
    fn mice_uses_destination() {
        let d = classify_and_decode(b"OH7LZB-13", b"SX15S6", b"'I',l \x1c>/]");
        assert_eq!(d.packet_type, PacketType::POSITION);
        assert!((d.position.unwrap().lat_degrees() + 38.256).abs() < 1e-4);
    }

    #[test]
    fn object_and_item() {
        let d = decode(b";LEADER   *092345z4903.50N/07201.75W>088/036");
        assert_eq!(d.packet_type, PacketType::OBJECT);
        assert_eq!(d.name.as_deref(), Some("LEADER"));
        assert!(!d.killed);
        assert!(d.position.is_some());

        let d = decode(b")AID #2_4903.50N/07201.75WA");
        assert_eq!(d.packet_type, PacketType::ITEM);
        assert!(d.killed);
    }

    #[test]
    fn object_without_position_is_still_an_object() {
        let d = decode(b";LEADER   _092345zxxxxxxxxxxxxxxxxxxx");
        assert_eq!(d.packet_type, PacketType::OBJECT);
        assert!(d.position.is_none());
        assert!(d.killed);
    }

    #[test]
    fn messages() {
        let d = decode(b":OH2ABC hello");
        assert_eq!(d.packet_type, PacketType::MESSAGE);
        assert!(d.is_aprs());
        assert!(d.recipient.is_none());

        let d = decode(b":OH2ABC   :hello{1");
        assert_eq!(d.packet_type, PacketType::MESSAGE);
        assert_eq!(d.recipient.as_deref(), Some("OH2ABC"));

        let d = decode(b":NWS-WARN :storm");
        assert_eq!(d.packet_type, PacketType::MESSAGE | PacketType::NWS);

        assert_eq!(decode(b":OH2ABC   :UNIT.V,C").packet_type, PacketType::TELEMETRY);
        assert_eq!(decode(b":OH2ABC   :?APRSD").packet_type, PacketType::QUERY);
    }

    #[test]
    fn classification_only_types() {
        assert_eq!(decode(b">status text").packet_type, PacketType::STATUS);
        assert_eq!(decode(b"<IGATE,MSG_CNT=1").packet_type, PacketType::STATCAPA);
        assert_eq!(decode(b"?APRS?").packet_type, PacketType::QUERY);
        assert_eq!(decode(b"T#005,199,000,255,073,123,01101001").packet_type, PacketType::TELEMETRY);
        assert_eq!(decode(b"_10090556c220s004g005t077").packet_type, PacketType::WX);
        assert_eq!(decode(b"{Q1qwerty").packet_type, PacketType::USERDEF);
        assert_eq!(
            decode(b"}OH2XYZ>APRS,TCPIP,OH2GW*:>hi").packet_type,
            PacketType::THIRDPARTY
        );
    }

    #[test]
    fn stray_position_found() {
        let d = decode(b"junk!4903.50N/07201.75W-");
        assert_eq!(d.packet_type, PacketType::POSITION);

        let mut far = vec![b'x'; 45];
        far.extend_from_slice(b"!4903.50N/07201.75W-");
        assert!(decode(&far).position.is_none());
    }

    #[test]
    fn cwop_source() {
        let d = classify_and_decode(b"CW1234", b"APRS", b"_10090556c220s004g005t077");
        assert_eq!(d.packet_type, PacketType::WX | PacketType::CWOP);
        assert!(!is_cwop_call(b"CWABC"));
        assert!(is_cwop_call(b"EW9876-1"));
        assert!(!is_cwop_call(b"CW"));
    }

    #[test]
    fn empty_info() {
        assert_eq!(decode(b""), Decoded::default());
    }
}
