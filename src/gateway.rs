//! The ingest pipeline: raw frame or line in, decoded [`Packet`] or a
//! [`Discard`] out.
//!
//! Both entry points run the same steps after their input-specific codec
//! step: parse and validate the TNC2 header, run the deny filters, allocate
//! the packet, decode the APRS payload, check for duplicates and update the
//! position history.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, trace};

use crate::aprs::decode_packet;
use crate::aprs_filters::{FilterConfig, Forbidden, Origin, check_packet};
use crate::ax25::{ax25_to_tnc2, tnc2_to_ax25};
use crate::callsign::CallsignMode;
use crate::config::GatewayConfig;
use crate::dupecheck::{DupeCheck, DupeChecker};
use crate::history::{HeardVia, History};
use crate::packet_buffer::{Packet, PacketPool, PacketSource};
use crate::packet_type::PacketType;
use crate::tnc2::{canonicalize_line, parse_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DiscardReason {
    #[error("forbidden source")]
    ForbiddenSource,
    #[error("forbidden destination")]
    ForbiddenDestination,
    #[error("forbidden via")]
    ForbiddenVia,
    #[error("forbidden payload")]
    ForbiddenPayload,
    #[error("malformed address")]
    MalformedAddress,
    /// AX.25 frame that is not UI with PID 0xF0
    #[error("not an APRS frame")]
    NotAprs,
    #[error("packet allocation failed")]
    AllocationFailure,
    #[error("duplicate")]
    Duplicate,
    /// Held by the delayed-relay dupe check, see [`Gateway::release_delayed`]
    #[error("held for delayed relay")]
    Delayed,
}

impl DiscardReason {
    /// Label value for metrics and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            DiscardReason::ForbiddenSource => "forbidden_source",
            DiscardReason::ForbiddenDestination => "forbidden_destination",
            DiscardReason::ForbiddenVia => "forbidden_via",
            DiscardReason::ForbiddenPayload => "forbidden_payload",
            DiscardReason::MalformedAddress => "malformed_address",
            DiscardReason::NotAprs => "not_aprs",
            DiscardReason::AllocationFailure => "allocation_failure",
            DiscardReason::Duplicate => "duplicate",
            DiscardReason::Delayed => "delayed",
        }
    }

    pub const ALL: [DiscardReason; 9] = [
        DiscardReason::ForbiddenSource,
        DiscardReason::ForbiddenDestination,
        DiscardReason::ForbiddenVia,
        DiscardReason::ForbiddenPayload,
        DiscardReason::MalformedAddress,
        DiscardReason::NotAprs,
        DiscardReason::AllocationFailure,
        DiscardReason::Duplicate,
        DiscardReason::Delayed,
    ];
}

impl From<Forbidden> for DiscardReason {
    fn from(forbidden: Forbidden) -> Self {
        match forbidden {
            Forbidden::Source => DiscardReason::ForbiddenSource,
            Forbidden::Destination => DiscardReason::ForbiddenDestination,
            Forbidden::Via => DiscardReason::ForbiddenVia,
            Forbidden::Payload => DiscardReason::ForbiddenPayload,
            Forbidden::MalformedThirdParty => DiscardReason::MalformedAddress,
        }
    }
}

/// A packet that will not be relayed. Duplicates still carry the packet,
/// with the DUPE flag set, for consumers of a dupe feed.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct Discard {
    pub reason: DiscardReason,
    pub packet: Option<Packet>,
}

impl Discard {
    fn new(reason: DiscardReason) -> Self {
        Self {
            reason,
            packet: None,
        }
    }
}

impl From<DiscardReason> for Discard {
    fn from(reason: DiscardReason) -> Self {
        Discard::new(reason)
    }
}

pub struct Gateway {
    pool: PacketPool,
    filters: FilterConfig,
    callsign_mode: CallsignMode,
    dupes: DupeChecker,
    history: History,
    viscous_delay: Option<Duration>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        config.validate().context("Invalid gateway configuration")?;
        let filters =
            FilterConfig::compile(&config.filters).context("Failed to compile packet filters")?;
        let callsign_mode = if config.strict_callsigns {
            CallsignMode::Strict
        } else {
            CallsignMode::Loose
        };
        let viscous_delay = (config.dupecheck.viscous_delay_seconds > 0)
            .then(|| Duration::seconds(config.dupecheck.viscous_delay_seconds as i64));

        info!(
            "Gateway ready: {} filter patterns, {:?} callsigns, dupe window {}s, history {}s (grace {}s), {} packet buffers",
            filters.pattern_count(),
            callsign_mode,
            config.dupecheck.retention_seconds,
            config.history.retention_seconds,
            config.history.grace_seconds,
            config.pool.max_buffers
        );

        Ok(Self {
            pool: PacketPool::new(config.pool.max_buffers),
            filters,
            callsign_mode,
            dupes: DupeChecker::with_retention_seconds(config.dupecheck.retention_seconds),
            history: History::with_retention(
                Duration::seconds(config.history.retention_seconds as i64),
                Duration::seconds(config.history.grace_seconds as i64),
            ),
            viscous_delay,
        })
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn dupes(&self) -> &DupeChecker {
        &self.dupes
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Ingest one AX.25 frame heard on radio port `port`.
    pub fn ingest_rf(
        &mut self,
        port: &str,
        subif: u8,
        frame: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Packet, Discard> {
        let span = tracing::debug_span!("ingest_rf", port, subif);
        let _entered = span.enter();
        metrics::counter!("gateway.packet.received", "source" => "rf").increment(1);

        let conversion = ax25_to_tnc2(frame).map_err(|e| {
            debug!("Undecodable AX.25 frame ({} bytes): {}", frame.len(), e);
            self.discarded(DiscardReason::MalformedAddress)
        })?;
        if conversion.discard {
            trace!("Non-UI frame from {}", String::from_utf8_lossy(&conversion.tnc2));
            return Err(self.discarded(DiscardReason::NotAprs));
        }

        let source = PacketSource::Rf {
            port: port.to_string(),
            subif,
        };
        let tnc2 = canonicalize_line(&conversion.tnc2);
        // addresses from an AX.25 header are strict by construction
        self.process(tnc2, frame, source, CallsignMode::Loose, now)
    }

    /// Ingest one TNC2 line from APRS-IS.
    pub fn ingest_aprsis(&mut self, line: &[u8], now: DateTime<Utc>) -> Result<Packet, Discard> {
        metrics::counter!("gateway.packet.received", "source" => "aprsis").increment(1);

        let tnc2 = canonicalize_line(line);
        let ax25 = match tnc2_to_ax25(tnc2) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("No AX.25 form for {}: {}", String::from_utf8_lossy(tnc2), e);
                Vec::new()
            }
        };
        self.process(tnc2, &ax25, PacketSource::AprsIs, self.callsign_mode, now)
    }

    fn discarded(&self, reason: DiscardReason) -> Discard {
        metrics::counter!("gateway.packet.discarded", "reason" => reason.label()).increment(1);
        Discard::new(reason)
    }

    fn process(
        &mut self,
        tnc2: &[u8],
        ax25: &[u8],
        source: PacketSource,
        mode: CallsignMode,
        now: DateTime<Utc>,
    ) -> Result<Packet, Discard> {
        let header = parse_header(tnc2, mode).map_err(|e| {
            debug!("Dropping {}: {}", String::from_utf8_lossy(tnc2), e);
            self.discarded(DiscardReason::MalformedAddress)
        })?;
        check_packet(tnc2, &header, &self.filters, Origin::from(&source)).map_err(|forbidden| {
            debug!("Dropping {}: {}", String::from_utf8_lossy(tnc2), forbidden);
            self.discarded(forbidden.into())
        })?;

        let mut packet = self
            .pool
            .allocate(tnc2.len(), ax25.len(), source, now)
            .map_err(|e| {
                debug!("Dropping {}: {}", String::from_utf8_lossy(tnc2), e);
                self.discarded(DiscardReason::AllocationFailure)
            })?;
        packet.tnc2_mut().copy_from_slice(tnc2);
        packet.ax25_mut().copy_from_slice(ax25);
        packet.set_header(header);
        decode_packet(&mut packet);

        if packet.packet_type.contains(PacketType::MESSAGE) {
            packet.recipient_position = packet
                .recipient
                .as_deref()
                .and_then(|recipient| self.history.lookup(recipient.as_bytes(), now))
                .and_then(|cell| cell.position);
        }
        let packet = packet.freeze();

        let heard_via = HeardVia::from(&packet.source);
        self.history.insert_heard(packet.srccall(), heard_via, now);

        let delayed = self.viscous_delay.is_some() && !packet.source.is_rf();
        let check = if delayed {
            self.dupes.check_or_hold(&packet, now)
        } else {
            self.dupes.check_packet(&packet, now)
        };
        if let DupeCheck::Hit(_) = check {
            packet.mark_dupe();
            debug!("Duplicate {}", packet.tnc2_str());
            let mut discard = self.discarded(DiscardReason::Duplicate);
            discard.packet = Some(packet);
            return Err(discard);
        }

        let outcome = self.history.insert_packet(&packet);
        trace!("History {:?} for {}", outcome, packet.tnc2_str());

        if delayed {
            return Err(self.discarded(DiscardReason::Delayed));
        }
        metrics::counter!("gateway.packet.accepted").increment(1);
        Ok(packet)
    }

    /// Packets held by the delayed-relay dupe check whose delay has passed,
    /// oldest first. Returns nothing when delayed relay is off.
    pub fn release_delayed(&mut self, now: DateTime<Utc>) -> Vec<Packet> {
        let Some(delay) = self.viscous_delay else {
            return Vec::new();
        };
        let released: Vec<Packet> = self
            .dupes
            .due_held(delay, now)
            .into_iter()
            .filter_map(|handle| self.dupes.take_held(handle))
            .collect();
        if !released.is_empty() {
            metrics::counter!("gateway.packet.accepted").increment(released.len() as u64);
        }
        released
    }

    pub fn sweep_dupes(&mut self, now: DateTime<Utc>) -> usize {
        self.dupes.sweep(now)
    }

    pub fn sweep_history(&mut self, now: DateTime<Utc>) -> usize {
        self.history.sweep(now)
    }
}
