//! Objects (`;`), items (`)`) and messages (`:`).

/// Object and item names are at most this long.
pub const MAX_NAME_LEN: usize = 9;

const OBJECT_NAME_LEN: usize = 9;
const OBJECT_TIMESTAMP_LEN: usize = 7;
/// Name, live/killed marker, timestamp, shortest (compressed) position.
const OBJECT_MIN_BODY_LEN: usize = OBJECT_NAME_LEN + 1 + OBJECT_TIMESTAMP_LEN + 13;
const ITEM_MIN_BODY_LEN: usize = 3 + 1 + 13;

/// Name and state of an object or item, and where its position starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedReport<'a> {
    pub name: String,
    pub killed: bool,
    pub position: &'a [u8],
}

fn printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Parse an object body (the information field after `;`):
/// `NNNNNNNNN*DDHHMMzPOSITION...`
pub fn parse_object(body: &[u8]) -> Option<NamedReport<'_>> {
    if body.len() < OBJECT_MIN_BODY_LEN {
        return None;
    }
    let killed = match body[OBJECT_NAME_LEN] {
        b'*' => false,
        b'_' => true,
        _ => return None,
    };
    let name = &body[..OBJECT_NAME_LEN];
    if !name.iter().all(|&b| printable(b)) {
        return None;
    }
    let name = String::from_utf8_lossy(name).trim_end_matches(' ').to_string();
    if name.is_empty() {
        return None;
    }

    let ts_end = OBJECT_NAME_LEN + 1 + OBJECT_TIMESTAMP_LEN;
    if !matches!(body[ts_end - 1], b'z' | b'h' | b'/') {
        return None;
    }

    Some(NamedReport {
        name,
        killed,
        position: &body[ts_end..],
    })
}

/// Parse an item body (the information field after `)`): a 3-9 character
/// name terminated by `!` (live) or `_` (killed), then the position.
pub fn parse_item(body: &[u8]) -> Option<NamedReport<'_>> {
    if body.len() < ITEM_MIN_BODY_LEN {
        return None;
    }
    let end = body
        .iter()
        .take(MAX_NAME_LEN + 1)
        .position(|&b| b == b'!' || b == b'_')?;
    if !(3..=MAX_NAME_LEN).contains(&end) {
        return None;
    }
    let name = &body[..end];
    if !name.iter().all(|&b| printable(b)) {
        return None;
    }

    Some(NamedReport {
        name: String::from_utf8_lossy(name).trim_end_matches(' ').to_string(),
        killed: body[end] == b'_',
        position: &body[end + 1..],
    })
}

/// What a `:` payload is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Person-to-person message, bulletin or announcement
    Message { recipient: String, nws: bool },
    /// `PARM.`, `UNIT.`, `EQNS.`, `BITS.` telemetry definitions
    Telemetry,
    /// Directed query (`?APRSP` and friends)
    Query,
}

const TELEMETRY_PREFIXES: [&[u8]; 4] = [b"PARM.", b"UNIT.", b"EQNS.", b"BITS."];
const NWS_PREFIXES: [&[u8]; 3] = [b"NWS-", b"NWS_", b"SKY"];

/// Classify a message body (the information field after `:`):
/// `RECIPIENT:text`, recipient space padded to 9 characters.
pub fn parse_message(body: &[u8]) -> Option<MessageKind> {
    if body.len() < 10 || body[9] != b':' {
        return None;
    }
    let text = &body[10..];
    if TELEMETRY_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return Some(MessageKind::Telemetry);
    }
    if text.first() == Some(&b'?') {
        return Some(MessageKind::Query);
    }

    let recipient_len = body[..9]
        .iter()
        .position(|&b| b == b' ' || b == b':')
        .unwrap_or(9);
    let recipient = String::from_utf8_lossy(&body[..recipient_len]).into_owned();
    let nws = NWS_PREFIXES.iter().any(|p| body.starts_with(p));

    Some(MessageKind::Message { recipient, nws })
}
