//! Last known position of every station, object and item.
//!
//! Cells are keyed by callsign (plain position reports) or by object/item
//! name, case-insensitively, at most [`HISTORY_KEY_MAX`] bytes. A cell
//! stays in the table for `retention` after it was last touched, but
//! [`History::lookup`] stops answering `retention - grace` after the last
//! position so callers never act on a cell that is about to be purged.
//!
//! Purging happens only in [`History::sweep`], which the event loop calls
//! about once a minute.

use std::io::{self, Write};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::cell_arena::{CellId, ChainedTable};
use crate::keyhash::{fold_to_bucket, keyhash_uppercase};
use crate::packet_buffer::{Packet, PacketSource};
use crate::packet_type::PacketType;
use crate::position::Position;

pub const HISTORY_BUCKETS: usize = 8192;
pub const HISTORY_KEY_MAX: usize = 9;
pub const DEFAULT_RETENTION_SECONDS: i64 = 3600;
pub const DEFAULT_GRACE_SECONDS: i64 = 300;
/// Longest information field prefix a cell keeps.
pub const HISTORY_BODY_MAX: usize = 64;

/// Which side of the gateway a station was heard on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeardVia {
    Rf,
    AprsIs,
}

impl From<&PacketSource> for HeardVia {
    fn from(source: &PacketSource) -> Self {
        if source.is_rf() {
            HeardVia::Rf
        } else {
            HeardVia::AprsIs
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryCell {
    key: String,
    hash: u32,
    pub position: Option<Position>,
    pub packet_type: PacketType,
    pub symbol: [u8; 2],
    /// Information field of the last position, cut at [`HISTORY_BODY_MAX`]
    body: Vec<u8>,
    /// When the current position arrived
    pub position_at: Option<DateTime<Utc>>,
    pub last_heard_rf: Option<DateTime<Utc>>,
    pub last_heard_aprsis: Option<DateTime<Utc>>,
    /// Last time anything refreshed the cell; drives expiry
    touched_at: DateTime<Utc>,
}

impl HistoryCell {
    fn new(key: &str, hash: u32, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            hash,
            position: None,
            packet_type: PacketType::empty(),
            symbol: [b' ', b' '],
            body: Vec::new(),
            position_at: None,
            last_heard_rf: None,
            last_heard_aprsis: None,
            touched_at: now,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn touched_at(&self) -> DateTime<Utc> {
        self.touched_at
    }

    fn heard(&mut self, via: HeardVia, now: DateTime<Utc>) {
        match via {
            HeardVia::Rf => self.last_heard_rf = Some(now),
            HeardVia::AprsIs => self.last_heard_aprsis = Some(now),
        }
        self.touched_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Packet type is not one the history keeps
    NotInteresting,
    /// Interesting type, but no usable position
    NoPosition,
    /// Empty or over-long key
    BadKey,
    Inserted,
    Updated,
    /// Kill marker; `removed` tells whether a cell was there
    Killed { removed: bool },
}

/// What one packet says about a history key.
struct Sighting<'a> {
    packet_type: PacketType,
    position: Option<Position>,
    symbol: [u8; 2],
    body: &'a [u8],
    killed: bool,
    heard_via: HeardVia,
}

pub struct History {
    table: ChainedTable<HistoryCell>,
    retention: Duration,
    grace: Duration,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_key(key: &[u8]) -> Option<&str> {
    if key.is_empty() || key.len() > HISTORY_KEY_MAX {
        return None;
    }
    std::str::from_utf8(key).ok()
}

impl History {
    pub fn new() -> Self {
        Self::with_retention(
            Duration::seconds(DEFAULT_RETENTION_SECONDS),
            Duration::seconds(DEFAULT_GRACE_SECONDS),
        )
    }

    pub fn with_retention(retention: Duration, grace: Duration) -> Self {
        debug_assert!(grace < retention);
        Self {
            table: ChainedTable::new(HISTORY_BUCKETS),
            retention,
            grace,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// How long after its position arrived a cell still answers lookups.
    pub fn validity(&self) -> Duration {
        self.retention - self.grace
    }

    fn locate(&self, key: &str) -> (u32, usize, Option<CellId>) {
        let hash = keyhash_uppercase(key.as_bytes(), 0);
        let bucket = fold_to_bucket(hash, HISTORY_BUCKETS);
        let found = self
            .table
            .find(bucket, |cell| cell.hash == hash && cell.key.eq_ignore_ascii_case(key));
        (hash, bucket, found)
    }

    fn update_gauge(&self) {
        metrics::gauge!("history.cells").set(self.table.len() as f64);
    }

    /// Store a position (or apply a kill marker) under `key`. `body` is
    /// the information field it came in.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        key: &[u8],
        packet_type: PacketType,
        position: Option<Position>,
        body: &[u8],
        killed: bool,
        heard_via: HeardVia,
        now: DateTime<Utc>,
    ) -> InsertOutcome {
        let sighting = Sighting {
            packet_type,
            position,
            symbol: [b' ', b' '],
            body,
            killed,
            heard_via,
        };
        self.insert_sighting(key, sighting, now)
    }

    fn insert_sighting(
        &mut self,
        key: &[u8],
        sighting: Sighting<'_>,
        now: DateTime<Utc>,
    ) -> InsertOutcome {
        let Sighting {
            packet_type,
            position,
            symbol,
            body,
            killed,
            heard_via,
        } = sighting;
        if !packet_type.is_history_interesting() {
            return InsertOutcome::NotInteresting;
        }
        let Some(key) = valid_key(key) else {
            trace!("History key {:?} rejected", String::from_utf8_lossy(key));
            return InsertOutcome::BadKey;
        };
        let (hash, bucket, found) = self.locate(key);

        if killed {
            let removed = found
                .and_then(|cell| self.table.remove(bucket, cell))
                .is_some();
            if removed {
                metrics::counter!("history.killed").increment(1);
                self.update_gauge();
                debug!("History cell {} killed", key);
            }
            return InsertOutcome::Killed { removed };
        }

        let Some(position) = position else {
            return InsertOutcome::NoPosition;
        };

        metrics::counter!("history.insert").increment(1);
        let fill = |cell: &mut HistoryCell| {
            cell.position = Some(position);
            cell.packet_type = packet_type;
            cell.symbol = symbol;
            cell.body.clear();
            cell.body.extend_from_slice(&body[..body.len().min(HISTORY_BODY_MAX)]);
            cell.position_at = Some(now);
            cell.heard(heard_via, now);
        };

        if let Some(cell) = found.and_then(|id| self.table.get_mut(id)) {
            fill(cell);
            return InsertOutcome::Updated;
        }
        let mut cell = HistoryCell::new(key, hash, now);
        fill(&mut cell);
        self.table.push_tail(bucket, cell);
        self.update_gauge();
        InsertOutcome::Inserted
    }

    /// Store what a decoded packet says about a position. Plain position
    /// reports are keyed by source callsign, objects and items by name.
    pub fn insert_packet(&mut self, packet: &Packet) -> InsertOutcome {
        let packet_type = packet.packet_type;
        if !packet_type.is_history_interesting() {
            return InsertOutcome::NotInteresting;
        }
        let key = if packet_type.intersects(PacketType::OBJECT | PacketType::ITEM) {
            match &packet.name {
                Some(name) => name.as_bytes(),
                None => return InsertOutcome::BadKey,
            }
        } else {
            packet.srccall()
        };
        let sighting = Sighting {
            packet_type,
            position: packet.position(),
            symbol: packet.symbol,
            body: packet.info(),
            killed: packet.killed,
            heard_via: HeardVia::from(&packet.source),
        };
        self.insert_sighting(key, sighting, packet.received_at)
    }

    /// The cell for `key`, if it holds a position younger than
    /// `retention - grace`.
    pub fn lookup(&self, key: &[u8], now: DateTime<Utc>) -> Option<&HistoryCell> {
        let hit = valid_key(key)
            .and_then(|key| self.locate(key).2)
            .and_then(|id| self.table.get(id))
            .filter(|cell| {
                cell.position.is_some()
                    && cell
                        .position_at
                        .is_some_and(|at| now - at < self.validity())
            });
        if hit.is_some() {
            metrics::counter!("history.lookup.hit").increment(1);
        } else {
            metrics::counter!("history.lookup.miss").increment(1);
        }
        hit
    }

    /// Note that `key` was heard, creating a position-less cell if needed.
    pub fn insert_heard(&mut self, key: &[u8], heard_via: HeardVia, now: DateTime<Utc>) -> bool {
        let Some(key) = valid_key(key) else {
            return false;
        };
        let (hash, bucket, found) = self.locate(key);
        if let Some(cell) = found.and_then(|id| self.table.get_mut(id)) {
            cell.heard(heard_via, now);
            return true;
        }
        let mut cell = HistoryCell::new(key, hash, now);
        cell.heard(heard_via, now);
        self.table.push_tail(bucket, cell);
        self.update_gauge();
        true
    }

    /// Was `key` heard on RF during the last `window`?
    pub fn heard_on_rf_within(&self, key: &[u8], window: Duration, now: DateTime<Utc>) -> bool {
        valid_key(key)
            .and_then(|key| self.locate(key).2)
            .and_then(|id| self.table.get(id))
            .and_then(|cell| cell.last_heard_rf)
            .is_some_and(|heard| now - heard <= window)
    }

    /// Purge every cell not touched for `retention`. Returns how many went.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let removed: usize = (0..HISTORY_BUCKETS)
            .map(|bucket| {
                self.table
                    .unlink_where(bucket, |_, cell| cell.touched_at + retention <= now)
                    .len()
            })
            .sum();
        if removed > 0 {
            metrics::counter!("history.expired").increment(removed as u64);
            self.update_gauge();
        }
        debug!(
            "History sweep removed {} cells, {} left",
            removed,
            self.table.len()
        );
        removed
    }

    /// One line per cell, sorted by key.
    pub fn dump<W: Write>(&self, writer: &mut W, now: DateTime<Utc>) -> io::Result<()> {
        let mut cells: Vec<&HistoryCell> = self.table.iter().map(|(_, cell)| cell).collect();
        cells.sort_by(|a, b| a.key.cmp(&b.key));

        let ago = |at: Option<DateTime<Utc>>| match at {
            Some(at) => format!("{}s", (now - at).num_seconds()),
            None => "-".to_string(),
        };
        for cell in cells {
            let position = match &cell.position {
                Some(p) => p.to_string(),
                None => "-".to_string(),
            };
            writeln!(
                writer,
                "{:<9} {} type={} pos={} age={} rf={} is={} body={}",
                cell.key,
                String::from_utf8_lossy(&cell.symbol),
                cell.packet_type.short_names(),
                position,
                ago(cell.position_at),
                ago(cell.last_heard_rf),
                ago(cell.last_heard_aprsis),
                String::from_utf8_lossy(&cell.body),
            )?;
        }
        Ok(())
    }
}
