//! TNC2 monitor format: `SRC>DST,VIA1,VIA2*,...:payload`.
//!
//! The parser does not copy anything. It validates the address block and
//! records the byte offsets the rest of the pipeline slices by.

use crate::ax25::CodecError;
use crate::callsign::{CallsignMode, is_valid_callsign};

/// APRS-IS allows a few more path elements than AX.25 (q-construct and
/// server call on top of 8 digipeaters).
pub const MAX_TNC2_VIAS: usize = 10;

/// Byte offsets into a TNC2 line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tnc2Header {
    /// Index of `>`
    pub srccall_end: usize,
    /// End of the destination base call (the `-` or the end of the call)
    pub dstcall_end_or_ssid: usize,
    /// End of the destination including SSID (a `,` or the `:`)
    pub dstcall_end: usize,
    /// Index of the `:` closing the address block
    pub path_end: usize,
    /// First byte of the information field
    pub info_start: usize,
}

impl Tnc2Header {
    pub fn srccall<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[..self.srccall_end]
    }

    pub fn dstcall<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.srccall_end + 1..self.dstcall_end]
    }

    /// Destination call without SSID.
    pub fn dstcall_base<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.srccall_end + 1..self.dstcall_end_or_ssid]
    }

    /// `SRC>DST,VIA...` without the closing `:`.
    pub fn address<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[..self.path_end]
    }

    pub fn info<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.info_start..]
    }

    /// Via path elements in order.
    pub fn vias<'a>(&self, line: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + use<'a> {
        let path = if self.dstcall_end < self.path_end {
            &line[self.dstcall_end + 1..self.path_end]
        } else {
            &line[self.path_end..self.path_end]
        };
        path.split(|&b| b == b',').filter(|v| !v.is_empty())
    }
}

/// Strip everything from the first line feed on, then any trailing carriage
/// returns. Applying it twice gives the same result as applying it once.
pub fn canonicalize_line(line: &[u8]) -> &[u8] {
    let line = match line.iter().position(|&b| b == b'\n') {
        Some(lf) => &line[..lf],
        None => line,
    };
    let mut end = line.len();
    while end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

/// Lines starting with `#` are APRS-IS server comments, not packets.
pub fn is_server_comment(line: &[u8]) -> bool {
    line.first() == Some(&b'#')
}

fn valid_token(token: &[u8], mode: CallsignMode) -> bool {
    std::str::from_utf8(token)
        .map(|s| is_valid_callsign(s, mode))
        .unwrap_or(false)
}

/// Parse and validate the address block of a TNC2 line.
pub fn parse_header(line: &[u8], mode: CallsignMode) -> Result<Tnc2Header, CodecError> {
    let srccall_end = line
        .iter()
        .position(|&b| b == b'>')
        .ok_or(CodecError::MalformedAddress("no '>' after source call"))?;
    let path_end = line[srccall_end..]
        .iter()
        .position(|&b| b == b':')
        .map(|p| p + srccall_end)
        .ok_or(CodecError::MalformedAddress("no ':' after address block"))?;

    let src = &line[..srccall_end];
    if src.is_empty() || src.ends_with(b"*") || !valid_token(src, mode) {
        return Err(CodecError::MalformedAddress("invalid source call"));
    }

    let dst_start = srccall_end + 1;
    let dstcall_end = line[dst_start..path_end]
        .iter()
        .position(|&b| b == b',')
        .map(|p| p + dst_start)
        .unwrap_or(path_end);
    let dst = &line[dst_start..dstcall_end];
    // destination never carries the repeated marker
    if dst.is_empty() || dst.ends_with(b"*") || !valid_token(dst, mode) {
        return Err(CodecError::MalformedAddress("invalid destination call"));
    }
    let dstcall_end_or_ssid = dst
        .iter()
        .position(|&b| b == b'-')
        .map(|p| p + dst_start)
        .unwrap_or(dstcall_end);

    if dstcall_end < path_end {
        let mut count = 0;
        for via in line[dstcall_end + 1..path_end].split(|&b| b == b',') {
            if via.is_empty() || !valid_token(via, CallsignMode::Loose) {
                return Err(CodecError::MalformedAddress("invalid via path element"));
            }
            if mode == CallsignMode::Strict && !valid_token(via, mode) {
                return Err(CodecError::MalformedAddress("via not valid for AX.25"));
            }
            count += 1;
        }
        if count > MAX_TNC2_VIAS {
            return Err(CodecError::TooManyVias(count));
        }
    }

    Ok(Tnc2Header {
        srccall_end,
        dstcall_end_or_ssid,
        dstcall_end,
        path_end,
        info_start: path_end + 1,
    })
}
