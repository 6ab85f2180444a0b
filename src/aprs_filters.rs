use anyhow::{Context, Result};
use regex::bytes::Regex;
use tracing::debug;

use crate::callsign::CallsignMode;
use crate::config::FilterSettings;
use crate::packet_buffer::PacketSource;
use crate::tnc2::{Tnc2Header, parse_header};

/// Third-party (`}`) frames may wrap one inner packet. A third-party frame
/// inside a third-party frame is rejected.
pub const MAX_THIRD_PARTY_DEPTH: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DenyPattern {
    /// Base call (SSID ignored) must be exactly this
    Exact(&'static str),
    /// Call starts with this
    Prefix(&'static str),
}

use DenyPattern::{Exact, Prefix};

const SOURCE_DENY: [DenyPattern; 7] = [
    Prefix("WIDE"),
    Prefix("RELAY"),
    Prefix("TRACE"),
    Prefix("TCPIP"),
    Prefix("TCPXX"),
    Exact("N0CALL"),
    Exact("NOCALL"),
];

const DESTINATION_DENY: [DenyPattern; 9] = [
    Prefix("WIDE"),
    Prefix("RELAY"),
    Prefix("TRACE"),
    Prefix("TCPIP"),
    Prefix("TCPXX"),
    Exact("N0CALL"),
    Exact("NOCALL"),
    Exact("NOGATE"),
    Exact("RFONLY"),
];

const VIA_DENY: [DenyPattern; 4] = [
    Exact("RFONLY"),
    Exact("NOGATE"),
    Prefix("TCPIP"),
    Prefix("TCPXX"),
];

/// APRS-IS packets carry `TCPIP*` as a matter of course; only the stricter
/// markers keep them out.
const APRSIS_VIA_DENY: [DenyPattern; 3] = [Exact("RFONLY"), Exact("NOGATE"), Prefix("TCPXX")];

/// Which side a packet being checked arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Rf,
    AprsIs,
}

impl From<&PacketSource> for Origin {
    fn from(source: &PacketSource) -> Self {
        if source.is_rf() {
            Origin::Rf
        } else {
            Origin::AprsIs
        }
    }
}

fn strip_repeated(call: &[u8]) -> &[u8] {
    call.strip_suffix(b"*").unwrap_or(call)
}

fn base_call(call: &[u8]) -> &[u8] {
    let call = strip_repeated(call);
    match call.iter().position(|&b| b == b'-') {
        Some(dash) => &call[..dash],
        None => call,
    }
}

fn denied(call: &[u8], list: &[DenyPattern]) -> bool {
    list.iter().any(|pattern| match pattern {
        Exact(word) => base_call(call) == word.as_bytes(),
        Prefix(prefix) => call.starts_with(prefix.as_bytes()),
    })
}

/// Why a packet is not allowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Forbidden {
    #[error("forbidden source")]
    Source,
    #[error("forbidden destination")]
    Destination,
    #[error("forbidden via path element")]
    Via,
    #[error("forbidden payload")]
    Payload,
    #[error("malformed third-party header")]
    MalformedThirdParty,
}

/// Operator supplied regular expressions, one ordered list per field class.
/// Any match means the packet is forbidden.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub source: Vec<Regex>,
    pub destination: Vec<Regex>,
    pub via: Vec<Regex>,
    pub data: Vec<Regex>,
}

fn compile_list(class: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).with_context(|| format!("Invalid {} filter pattern {:?}", class, p))
        })
        .collect()
}

impl FilterConfig {
    /// Compile the pattern strings from the configuration file.
    pub fn compile(settings: &FilterSettings) -> Result<Self> {
        Ok(Self {
            source: compile_list("source", &settings.source)?,
            destination: compile_list("destination", &settings.destination)?,
            via: compile_list("via", &settings.via)?,
            data: compile_list("data", &settings.data)?,
        })
    }

    pub fn pattern_count(&self) -> usize {
        self.source.len() + self.destination.len() + self.via.len() + self.data.len()
    }
}

fn any_match(list: &[Regex], text: &[u8]) -> bool {
    list.iter().any(|re| re.is_match(text))
}

pub fn is_forbidden_source(call: &[u8], config: &FilterConfig) -> bool {
    denied(call, &SOURCE_DENY) || any_match(&config.source, call)
}

pub fn is_forbidden_destination(call: &[u8], config: &FilterConfig) -> bool {
    denied(call, &DESTINATION_DENY) || any_match(&config.destination, call)
}

pub fn is_forbidden_via(call: &[u8], config: &FilterConfig) -> bool {
    let call = strip_repeated(call);
    denied(call, &VIA_DENY) || any_match(&config.via, call)
}

/// Via check for packets that came from APRS-IS.
pub fn is_forbidden_aprsis_via(call: &[u8], config: &FilterConfig) -> bool {
    let call = strip_repeated(call);
    denied(call, &APRSIS_VIA_DENY) || any_match(&config.via, call)
}

pub fn is_forbidden_payload(data: &[u8], config: &FilterConfig) -> bool {
    any_match(&config.data, data)
}

/// Run every address and payload filter over a parsed TNC2 line, then again
/// over the inner packet of a third-party frame.
pub fn check_packet(
    line: &[u8],
    header: &Tnc2Header,
    config: &FilterConfig,
    origin: Origin,
) -> Result<(), Forbidden> {
    check_level(line, header, config, origin, 0)
}

fn check_level(
    line: &[u8],
    header: &Tnc2Header,
    config: &FilterConfig,
    origin: Origin,
    depth: usize,
) -> Result<(), Forbidden> {
    let via_forbidden: fn(&[u8], &FilterConfig) -> bool = match origin {
        Origin::Rf => is_forbidden_via,
        Origin::AprsIs => is_forbidden_aprsis_via,
    };
    if is_forbidden_source(header.srccall(line), config) {
        return Err(Forbidden::Source);
    }
    if is_forbidden_destination(header.dstcall(line), config) {
        return Err(Forbidden::Destination);
    }
    if header.vias(line).any(|via| via_forbidden(via, config)) {
        return Err(Forbidden::Via);
    }
    let info = header.info(line);
    if is_forbidden_payload(info, config) {
        return Err(Forbidden::Payload);
    }

    if let Some(inner) = info.strip_prefix(b"}") {
        if depth >= MAX_THIRD_PARTY_DEPTH {
            debug!("Third-party frame nested deeper than {}", MAX_THIRD_PARTY_DEPTH);
            return Err(Forbidden::MalformedThirdParty);
        }
        let inner_header =
            parse_header(inner, CallsignMode::Loose).map_err(|_| Forbidden::MalformedThirdParty)?;
        return check_level(inner, &inner_header, config, origin, depth + 1);
    }
    Ok(())
}
