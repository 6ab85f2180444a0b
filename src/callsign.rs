use once_cell::sync::Lazy;
use regex::Regex;

/// AX.25 mode: up to 6 upper-case alphanumerics, SSID 0-15, optional `*`.
static STRICT_CALLSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{1,6}(?:-(?:1[0-5]|[0-9]))?\*?$").unwrap());

/// APRS-IS mode: longer calls and any 1-2 character alphanumeric SSID tail.
static LOOSE_CALLSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,9}(?:-[A-Za-z0-9]{1,2})?\*?$").unwrap());

/// Which callsign grammar to enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallsignMode {
    /// Radio side: must be encodable as a 7-byte AX.25 address
    Strict,
    /// APRS-IS side: alphanumeric tails like `-TS` or 9 character calls are fine
    Loose,
}

/// Check a callsign token (possibly with SSID and a trailing `*`).
pub fn is_valid_callsign(call: &str, mode: CallsignMode) -> bool {
    match mode {
        CallsignMode::Strict => STRICT_CALLSIGN_RE.is_match(call),
        CallsignMode::Loose => LOOSE_CALLSIGN_RE.is_match(call),
    }
}

/// Split `CALL-SSID*` into (`CALL`, ssid text, repeated marker).
pub fn split_callsign(token: &str) -> (&str, Option<&str>, bool) {
    let (token, repeated) = match token.strip_suffix('*') {
        Some(t) => (t, true),
        None => (token, false),
    };
    match token.split_once('-') {
        Some((base, ssid)) => (base, Some(ssid), repeated),
        None => (token, None, repeated),
    }
}
