//! AX.25 address codec and the AX.25 <-> TNC2 conversions.
//!
//! An AX.25 UI frame as handed to us (KISS port byte already removed):
//! - 7 bytes: destination address
//! - 7 bytes: source address
//! - 0..8 x 7 bytes: digipeater addresses
//! - 1 byte: control (0x03 for UI)
//! - 1 byte: PID (0xF0, no layer 3)
//! - N bytes: information field
//!
//! Each address is six callsign characters shifted left by one bit, padded
//! with shifted spaces, and an SSID byte `HRRSSSSE`: H is the has-been-
//! repeated bit (the command bit on the destination), RR reserved (sent as
//! ones), SSSS the SSID and E the end-of-address marker.

use std::fmt;
use std::str::FromStr;

use crate::callsign::{CallsignMode, is_valid_callsign, split_callsign};
use crate::tnc2::{self, canonicalize_line};

pub const AX25_ADDR_LEN: usize = 7;
pub const AX25_MAX_VIAS: usize = 8;
pub const AX25_CONTROL_UI: u8 = 0x03;
pub const AX25_PID_NO_LAYER3: u8 = 0xF0;

const SSID_RESERVED_BITS: u8 = 0x60;
const SSID_H_BIT: u8 = 0x80;
const SSID_END_BIT: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed address: {0}")]
    MalformedAddress(&'static str),
    #[error("too many via path elements: {0}")]
    TooManyVias(usize),
    #[error("frame truncated after {0} bytes")]
    Truncated(usize),
    #[error("not representable in AX.25: {0}")]
    NotRepresentable(String),
}

/// One decoded AX.25 address field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ax25Address {
    pub callsign: String,
    pub ssid: u8,
    /// The H bit: repeated for vias, command for the destination
    pub repeated: bool,
}

impl Ax25Address {
    pub fn new(callsign: &str, ssid: u8) -> Self {
        Self {
            callsign: callsign.to_string(),
            ssid,
            repeated: false,
        }
    }

    /// Decode a 7-byte address field. The end-of-address bit is not part of
    /// the address, read it with [`is_last_address`].
    pub fn decode(field: &[u8; AX25_ADDR_LEN]) -> Result<Self, CodecError> {
        let mut callsign = String::with_capacity(6);
        let mut padding = false;
        for &b in &field[..6] {
            if b & 1 != 0 {
                return Err(CodecError::MalformedAddress("end bit inside callsign"));
            }
            let c = (b >> 1) as char;
            if c == ' ' {
                padding = true;
                continue;
            }
            if padding || !(c.is_ascii_uppercase() || c.is_ascii_digit()) {
                return Err(CodecError::MalformedAddress("bad callsign character"));
            }
            callsign.push(c);
        }
        if callsign.is_empty() {
            return Err(CodecError::MalformedAddress("empty callsign"));
        }

        Ok(Self {
            callsign,
            ssid: (field[6] >> 1) & 0x0f,
            repeated: field[6] & SSID_H_BIT != 0,
        })
    }

    /// Encode into a 7-byte field, setting the end bit if `last`.
    pub fn encode(&self, last: bool) -> [u8; AX25_ADDR_LEN] {
        let mut field = [b' ' << 1; AX25_ADDR_LEN];
        for (slot, c) in field.iter_mut().zip(self.callsign.bytes().take(6)) {
            *slot = c << 1;
        }
        let mut ssid_byte = SSID_RESERVED_BITS | ((self.ssid & 0x0f) << 1);
        if self.repeated {
            ssid_byte |= SSID_H_BIT;
        }
        if last {
            ssid_byte |= SSID_END_BIT;
        }
        field[6] = ssid_byte;
        field
    }

    /// `CALL` or `CALL-SSID`, without the repeated marker.
    pub fn call_with_ssid(&self) -> String {
        if self.ssid == 0 {
            self.callsign.clone()
        } else {
            format!("{}-{}", self.callsign, self.ssid)
        }
    }
}

pub fn is_last_address(field: &[u8; AX25_ADDR_LEN]) -> bool {
    field[6] & SSID_END_BIT != 0
}

impl fmt::Display for Ax25Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.call_with_ssid())?;
        if self.repeated {
            write!(f, "*")?;
        }
        Ok(())
    }
}

impl FromStr for Ax25Address {
    type Err = CodecError;

    /// Parse a TNC2 address token (`CALL`, `CALL-SSID`, optionally with `*`).
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if !is_valid_callsign(token, CallsignMode::Strict) {
            return Err(CodecError::NotRepresentable(token.to_string()));
        }
        let (call, ssid, repeated) = split_callsign(token);
        let ssid = match ssid {
            Some(s) => s
                .parse::<u8>()
                .map_err(|_| CodecError::NotRepresentable(token.to_string()))?,
            None => 0,
        };
        Ok(Self {
            callsign: call.to_string(),
            ssid,
            repeated,
        })
    }
}

/// Result of converting an AX.25 frame to TNC2 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tnc2Conversion {
    pub tnc2: Vec<u8>,
    /// Not a UI frame with PID 0xF0; the packet must not be gated
    pub discard: bool,
}

fn address_field(frame: &[u8], index: usize) -> Option<&[u8; AX25_ADDR_LEN]> {
    let start = index * AX25_ADDR_LEN;
    frame.get(start..start + AX25_ADDR_LEN)?.try_into().ok()
}

fn is_ui_header(frame: &[u8], header_end: usize) -> bool {
    frame.get(header_end) == Some(&AX25_CONTROL_UI)
        && frame.get(header_end + 1) == Some(&AX25_PID_NO_LAYER3)
}

/// The frame has a complete address block followed by Control 0x03 and
/// PID 0xF0.
pub fn is_ui_frame(frame: &[u8]) -> bool {
    for index in 0..2 + AX25_MAX_VIAS {
        let Some(field) = address_field(frame, index) else {
            return false;
        };
        if is_last_address(field) {
            return index >= 1 && is_ui_header(frame, (index + 1) * AX25_ADDR_LEN);
        }
    }
    false
}

/// Convert a raw AX.25 frame into a TNC2 monitor line.
pub fn ax25_to_tnc2(frame: &[u8]) -> Result<Tnc2Conversion, CodecError> {
    if frame.len() < 2 * AX25_ADDR_LEN {
        return Err(CodecError::Truncated(frame.len()));
    }

    let mut addresses = Vec::with_capacity(2 + AX25_MAX_VIAS);
    let mut index = 0;
    loop {
        let field = address_field(frame, index).ok_or(CodecError::Truncated(frame.len()))?;
        let address = Ax25Address::decode(field)?;
        let last = is_last_address(field);
        addresses.push(address);
        index += 1;
        if last {
            break;
        }
        if index >= 2 + AX25_MAX_VIAS {
            return Err(CodecError::TooManyVias(index - 1));
        }
    }
    if addresses.len() < 2 {
        return Err(CodecError::MalformedAddress("end of address on destination"));
    }

    let header_end = index * AX25_ADDR_LEN;
    let discard = !is_ui_header(frame, header_end);
    let payload = frame.get(header_end + 2..).unwrap_or(&[]);
    let payload = canonicalize_line(payload);

    let mut tnc2 = Vec::with_capacity(16 + addresses.len() * 10 + payload.len());
    tnc2.extend_from_slice(addresses[1].call_with_ssid().as_bytes());
    tnc2.push(b'>');
    tnc2.extend_from_slice(addresses[0].call_with_ssid().as_bytes());
    for via in &addresses[2..] {
        tnc2.push(b',');
        tnc2.extend_from_slice(via.to_string().as_bytes());
    }
    tnc2.push(b':');
    tnc2.extend_from_slice(payload);

    Ok(Tnc2Conversion { tnc2, discard })
}

/// Encode a TNC2 line as an AX.25 UI frame.
///
/// Fails with [`CodecError::NotRepresentable`] for APRS-IS-only addresses
/// (long calls, alphanumeric SSIDs, q-constructs) or more than eight vias.
pub fn tnc2_to_ax25(line: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = tnc2::parse_header(line, CallsignMode::Loose)?;

    let token = |bytes: &[u8]| -> Result<Ax25Address, CodecError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|_| CodecError::NotRepresentable(String::from_utf8_lossy(bytes).into_owned()))?;
        s.parse::<Ax25Address>()
    };

    let src = token(header.srccall(line))?;
    let mut dst = token(header.dstcall(line))?;
    dst.repeated = true;
    let vias = header
        .vias(line)
        .map(token)
        .collect::<Result<Vec<_>, _>>()?;
    if vias.len() > AX25_MAX_VIAS {
        return Err(CodecError::NotRepresentable(format!("{} vias", vias.len())));
    }
    let info = header.info(line);

    let mut frame = Vec::with_capacity((2 + vias.len()) * AX25_ADDR_LEN + 2 + info.len());
    frame.extend_from_slice(&dst.encode(false));
    frame.extend_from_slice(&src.encode(vias.is_empty()));
    for (i, via) in vias.iter().enumerate() {
        frame.extend_from_slice(&via.encode(i + 1 == vias.len()));
    }
    frame.push(AX25_CONTROL_UI);
    frame.push(AX25_PID_NO_LAYER3);
    frame.extend_from_slice(info);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // N0CALL>APRS,WIDE1-1*:test
    const FRAME: [u8; 27] = hex!(
        "82a0a4a64040e0"
        "9c608682989860"
        "ae92888a6240e3"
        "03f0"
        "74657374"
    );

    #[test]
    fn decode_ui_frame() {
        let conv = ax25_to_tnc2(&FRAME).unwrap();
        assert_eq!(conv.tnc2, b"N0CALL>APRS,WIDE1-1*:test");
        assert!(!conv.discard);
    }

    #[test]
    fn encode_matches_wire_bytes() {
        let frame = tnc2_to_ax25(b"N0CALL>APRS,WIDE1-1*:test").unwrap();
        assert_eq!(frame, FRAME);
    }

    #[test]
    fn non_ui_frame_is_discarded() {
        assert!(is_ui_frame(&FRAME));
        let mut frame = FRAME;
        frame[21] = 0x13;
        assert!(ax25_to_tnc2(&frame).unwrap().discard);
        assert!(!is_ui_frame(&frame));

        let mut frame = FRAME;
        frame[22] = 0xcf;
        assert!(ax25_to_tnc2(&frame).unwrap().discard);

        // control byte missing entirely
        assert!(ax25_to_tnc2(&FRAME[..21]).unwrap().discard);
        assert!(!is_ui_frame(&FRAME[..21]));
        assert!(!is_ui_frame(&[]));
    }

    #[test]
    fn payload_stops_at_line_feed() {
        let mut frame = FRAME[..23].to_vec();
        frame.extend_from_slice(b"hello\r\r\nworld");
        assert_eq!(ax25_to_tnc2(&frame).unwrap().tnc2, b"N0CALL>APRS,WIDE1-1*:hello");
    }

    #[test]
    fn missing_end_bit_is_truncated() {
        let mut frame = FRAME;
        frame[20] &= !SSID_END_BIT;
        // control/pid/payload bytes are now read as a fourth address
        assert!(ax25_to_tnc2(&frame).is_err());
    }

    #[test]
    fn end_bit_on_destination_is_malformed() {
        let mut frame = FRAME;
        frame[6] |= SSID_END_BIT;
        assert_eq!(
            ax25_to_tnc2(&frame),
            Err(CodecError::MalformedAddress("end of address on destination"))
        );
    }

    #[test]
    fn short_frame() {
        assert_eq!(ax25_to_tnc2(&FRAME[..10]), Err(CodecError::Truncated(10)));
    }

    #[test]
    fn address_token_parsing() {
        let a: Ax25Address = "WIDE2-2*".parse().unwrap();
        assert_eq!(a.callsign, "WIDE2");
        assert_eq!(a.ssid, 2);
        assert!(a.repeated);
        assert_eq!(a.to_string(), "WIDE2-2*");

        assert!("OH2XYZ-16".parse::<Ax25Address>().is_err());
        assert!("qAR".parse::<Ax25Address>().is_err());
        assert!("TOOLONGCALL".parse::<Ax25Address>().is_err());
    }

    #[test]
    fn address_field_round_trip() {
        let a = Ax25Address::new("OH2XYZ", 15);
        let field = a.encode(true);
        assert!(is_last_address(&field));
        assert_eq!(Ax25Address::decode(&field).unwrap(), a);
    }

    #[test]
    fn aprsis_only_lines_are_not_representable() {
        let err = tnc2_to_ax25(b"OH2XYZ-TS>APRS,TCPIP*,qAC,T2FINLAND:hi").unwrap_err();
        assert!(matches!(err, CodecError::NotRepresentable(_)));
        let err = tnc2_to_ax25(b"N0CALL>APRS,A,B,C,D,E,F,G,H,I:hi").unwrap_err();
        assert!(matches!(err, CodecError::NotRepresentable(_)));
    }
}
