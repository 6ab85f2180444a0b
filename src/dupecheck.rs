//! Short-horizon duplicate suppression.
//!
//! A packet is a duplicate when a packet with the same canonical address
//! (`SRC>DST`, no path, no `-0` SSIDs) and the same payload (trailing spaces
//! trimmed) was seen within the retention window. The path is ignored so a
//! packet heard through several digipeaters or igates counts once.
//!
//! Records live in 64 hash-chained buckets. Each lookup first drops the
//! expired records of the bucket it is about to walk ([`DupeChecker::expire_chain`]);
//! a periodic [`DupeChecker::sweep`] catches buckets nobody walks.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::cell_arena::{CellId, ChainedTable};
use crate::config::MAX_SECONDS;
use crate::keyhash::{fold_to_bucket, keyhash};
use crate::packet_buffer::{Packet, WeakPacket};

pub const DUPECHECK_BUCKETS: usize = 64;

/// What a record knows about the packet that created it.
#[derive(Debug, Clone, Default)]
pub enum RecordPacket {
    #[default]
    None,
    /// Observed only; the packet may already be gone
    Observed(WeakPacket),
    /// Owned until [`DupeChecker::take_held`] or expiry
    Held(Packet),
}

#[derive(Debug)]
pub struct DupeRecord {
    hash: u32,
    address: Vec<u8>,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Sightings while not holding a packet, the first one included
    pub seen: u32,
    /// Sightings while holding a packet for delayed relay
    pub delayed_seen: u32,
    packet: RecordPacket,
}

impl DupeRecord {
    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn address(&self) -> &[u8] {
        &self.address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.packet, RecordPacket::Held(_))
    }

    /// The packet that created the record, if it is still alive.
    pub fn packet(&self) -> Option<Packet> {
        match &self.packet {
            RecordPacket::None => None,
            RecordPacket::Observed(weak) => weak.upgrade(),
            RecordPacket::Held(packet) => Some(packet.clone()),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Stable reference to a record, valid until the record is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DupeHandle {
    bucket: usize,
    cell: CellId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupeCheck {
    /// First sighting; a new record was created
    Miss(DupeHandle),
    /// Seen before within the retention window
    Hit(DupeHandle),
}

impl DupeCheck {
    pub fn is_dupe(&self) -> bool {
        matches!(self, DupeCheck::Hit(_))
    }

    pub fn handle(&self) -> DupeHandle {
        match self {
            DupeCheck::Miss(h) | DupeCheck::Hit(h) => *h,
        }
    }
}

/// Address part of the key: `SRC>DST` with the path cut off and `-0`
/// SSIDs dropped. Only the first `-` of a call is copied.
pub fn canonical_address(address: &[u8]) -> Vec<u8> {
    let end = address
        .iter()
        .position(|&b| b == b',' || b == b':')
        .unwrap_or(address.len());
    let address = &address[..end];

    let mut out = Vec::with_capacity(address.len());
    let mut dash_seen = false;
    let mut i = 0;
    while i < address.len() {
        let c = address[i];
        match c {
            b'>' => {
                dash_seen = false;
                out.push(c);
            }
            b'-' => {
                let zero_ssid = address.get(i + 1) == Some(&b'0')
                    && matches!(address.get(i + 2), None | Some(b'>'));
                if zero_ssid {
                    i += 2;
                    continue;
                }
                if !dash_seen {
                    out.push(c);
                }
                dash_seen = true;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Payload part of the key: trailing spaces trimmed.
pub fn canonical_payload(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |p| p + 1);
    &payload[..end]
}

pub struct DupeChecker {
    table: ChainedTable<DupeRecord>,
    retention: Duration,
}

impl DupeChecker {
    pub fn new(retention: Duration) -> Self {
        Self {
            table: ChainedTable::new(DUPECHECK_BUCKETS),
            retention,
        }
    }

    /// Retention in whole seconds, clamped to [`MAX_SECONDS`].
    pub fn with_retention_seconds(seconds: u64) -> Self {
        Self::new(Duration::seconds(seconds.min(MAX_SECONDS) as i64))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, handle: DupeHandle) -> Option<&DupeRecord> {
        self.table.get(handle.cell)
    }

    /// Unlink every expired record of one bucket. Returns how many went.
    ///
    /// Runs at the start of every lookup on the bucket being looked at, and
    /// for every bucket during [`DupeChecker::sweep`].
    pub fn expire_chain(&mut self, bucket: usize, now: DateTime<Utc>) -> usize {
        let expired = self.table.unlink_where(bucket, |_, record| record.is_expired(now));
        if !expired.is_empty() {
            metrics::counter!("dupecheck.expired").increment(expired.len() as u64);
            metrics::gauge!("dupecheck.records").set(self.table.len() as f64);
        }
        let unreleased = expired.iter().filter(|record| record.is_holding()).count();
        if unreleased > 0 {
            warn!("{} held packets expired before release", unreleased);
            metrics::counter!("dupecheck.held_expired").increment(unreleased as u64);
        }
        // held packets are released here as the records drop
        expired.len()
    }

    fn lookup_or_insert(
        &mut self,
        address: &[u8],
        payload: &[u8],
        now: DateTime<Utc>,
        packet: impl FnOnce() -> RecordPacket,
    ) -> DupeCheck {
        let address = canonical_address(address);
        let payload = canonical_payload(payload);
        let hash = keyhash(payload, keyhash(&address, 0));
        let bucket = fold_to_bucket(hash, DUPECHECK_BUCKETS);

        self.expire_chain(bucket, now);

        let found = self.table.find(bucket, |record| {
            record.hash == hash && record.address == address && record.payload == payload
        });
        if let Some(cell) = found {
            if let Some(record) = self.table.get_mut(cell) {
                if record.is_holding() {
                    record.delayed_seen += 1;
                } else {
                    record.seen += 1;
                }
            }
            metrics::counter!("dupecheck.hit").increment(1);
            return DupeCheck::Hit(DupeHandle { bucket, cell });
        }

        let record = DupeRecord {
            hash,
            address,
            payload: payload.to_vec(),
            created_at: now,
            expires_at: now + self.retention,
            seen: 1,
            delayed_seen: 0,
            packet: packet(),
        };
        let cell = self.table.push_tail(bucket, record);
        metrics::counter!("dupecheck.miss").increment(1);
        metrics::gauge!("dupecheck.records").set(self.table.len() as f64);
        DupeCheck::Miss(DupeHandle { bucket, cell })
    }

    /// Check raw address and payload bytes, recording them on a miss.
    pub fn check_or_insert(&mut self, address: &[u8], payload: &[u8], now: DateTime<Utc>) -> DupeCheck {
        self.lookup_or_insert(address, payload, now, || RecordPacket::None)
    }

    /// Check a packet. A new record observes the packet without keeping it
    /// alive.
    pub fn check_packet(&mut self, packet: &Packet, now: DateTime<Utc>) -> DupeCheck {
        self.lookup_or_insert(packet.address(), packet.info(), now, || {
            RecordPacket::Observed(packet.downgrade())
        })
    }

    /// Delayed-relay variant: a new record takes a reference to the packet
    /// and holds it until [`DupeChecker::take_held`], removal or expiry.
    pub fn check_or_hold(&mut self, packet: &Packet, now: DateTime<Utc>) -> DupeCheck {
        self.lookup_or_insert(packet.address(), packet.info(), now, || {
            RecordPacket::Held(packet.acquire())
        })
    }

    /// Give up the record's hold on its packet and return it. The record
    /// stays, so later copies are still suppressed.
    pub fn take_held(&mut self, handle: DupeHandle) -> Option<Packet> {
        let record = self.table.get_mut(handle.cell)?;
        match std::mem::take(&mut record.packet) {
            RecordPacket::Held(packet) => {
                record.packet = RecordPacket::Observed(packet.downgrade());
                Some(packet)
            }
            other => {
                record.packet = other;
                None
            }
        }
    }

    /// Records holding a packet for at least `delay`, oldest first.
    pub fn due_held(&self, delay: Duration, now: DateTime<Utc>) -> Vec<DupeHandle> {
        let mut due: Vec<(DateTime<Utc>, DupeHandle)> = (0..self.table.buckets())
            .flat_map(|bucket| {
                self.table
                    .chain(bucket)
                    .filter(|(_, record)| record.is_holding() && record.created_at + delay <= now)
                    .map(move |(cell, record)| (record.created_at, DupeHandle { bucket, cell }))
            })
            .collect();
        due.sort_by_key(|(created_at, _)| *created_at);
        due.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Remove a record now, releasing any packet it holds.
    pub fn remove(&mut self, handle: DupeHandle) -> bool {
        let removed = self.table.remove(handle.bucket, handle.cell).is_some();
        if removed {
            metrics::gauge!("dupecheck.records").set(self.table.len() as f64);
        }
        removed
    }

    /// Drop every expired record in the table. Returns how many went.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let removed: usize = (0..DUPECHECK_BUCKETS)
            .map(|bucket| self.expire_chain(bucket, now))
            .sum();
        debug!(
            "Dupecheck sweep removed {} records, {} left",
            removed,
            self.table.len()
        );
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_buffer::{PacketPool, PacketSource};
    use crate::callsign::CallsignMode;
    use crate::tnc2::parse_header;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn packet(pool: &PacketPool, line: &[u8], now: DateTime<Utc>) -> Packet {
        let mut p = pool.allocate(line.len(), 0, PacketSource::AprsIs, now).unwrap();
        p.tnc2_mut().copy_from_slice(line);
        p.set_header(parse_header(line, CallsignMode::Loose).unwrap());
        p.freeze()
    }

    #[test]
    fn miss_hit_then_expired_miss() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        assert!(!dc.check_or_insert(b"N0CALL>APRS", b"test", now).is_dupe());
        assert!(dc.check_or_insert(b"N0CALL>APRS", b"test", now + Duration::seconds(10)).is_dupe());
        let third = dc.check_or_insert(b"N0CALL>APRS", b"test", now + Duration::seconds(31));
        assert!(!third.is_dupe());
        assert_eq!(dc.len(), 1);
        assert_eq!(dc.get(third.handle()).unwrap().seen, 1);
    }

    #[test]
    fn expiry_boundary() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        dc.check_or_insert(b"A>B", b"x", now);
        assert!(dc.check_or_insert(b"A>B", b"x", now + Duration::seconds(29)).is_dupe());
        assert!(!dc.check_or_insert(b"A>B", b"x", now + Duration::seconds(30)).is_dupe());
    }

    #[test]
    fn path_and_trailing_spaces_ignored() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        dc.check_or_insert(b"OH2XYZ>APRS,WIDE1-1,WIDE2-1", b"hello", now);
        assert!(dc.check_or_insert(b"OH2XYZ>APRS,OH2RDP*,qAR,OH2GW", b"hello   ", now).is_dupe());
        assert!(dc.check_or_insert(b"OH2XYZ-0>APRS-0", b"hello", now).is_dupe());
        assert!(!dc.check_or_insert(b"OH2XYZ-1>APRS", b"hello", now).is_dupe());
        assert!(!dc.check_or_insert(b"OH2XYZ>APRS", b"hello!", now).is_dupe());
        assert!(!dc.check_or_insert(b"OH2XYZ>APRS", b" hello", now).is_dupe());
    }

    #[test]
    fn hit_counts_sightings() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let first = dc.check_or_insert(b"A>B", b"x", now);
        dc.check_or_insert(b"A>B", b"x", now);
        dc.check_or_insert(b"A>B", b"x", now);
        assert_eq!(dc.get(first.handle()).unwrap().seen, 3);
    }

    #[test]
    fn canonical_address_rules() {
        assert_eq!(canonical_address(b"OH2XYZ-0>APRS-0,WIDE1-1"), b"OH2XYZ>APRS");
        assert_eq!(canonical_address(b"OH2XYZ-10>APRS"), b"OH2XYZ-10>APRS");
        assert_eq!(canonical_address(b"OH2XYZ-05>APRS"), b"OH2XYZ-05>APRS");
        assert_eq!(canonical_address(b"OH2-X-Y>APRS:payload"), b"OH2-XY>APRS");
        assert_eq!(canonical_payload(b"abc  "), b"abc");
        assert_eq!(canonical_payload(b"   "), b"");
    }

    #[test]
    fn lazy_expiry_on_walk() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        for i in 0..200u32 {
            dc.check_or_insert(b"A>B", i.to_string().as_bytes(), now);
        }
        assert_eq!(dc.len(), 200);
        // every bucket gets walked by some of these lookups
        let later = now + Duration::seconds(60);
        for i in 0..200u32 {
            dc.check_or_insert(b"A>B", i.to_string().as_bytes(), later);
        }
        assert_eq!(dc.len(), 200);
        assert_eq!(dc.sweep(later + Duration::seconds(1)), 0);
        assert_eq!(dc.sweep(later + Duration::seconds(30)), 200);
        assert!(dc.is_empty());
    }

    #[test]
    fn expire_chain_is_per_bucket() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let h = dc.check_or_insert(b"A>B", b"x", now).handle();
        assert_eq!(dc.expire_chain(h.bucket, now + Duration::seconds(5)), 0);
        assert_eq!(dc.expire_chain(h.bucket, now + Duration::seconds(30)), 1);
        assert!(dc.get(h).is_none());
    }

    #[test]
    fn observed_packet_is_not_kept_alive() {
        let pool = PacketPool::new(4);
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let p = packet(&pool, b"OH2XYZ>APRS:>status", now);
        let check = dc.check_packet(&p, now);
        assert_eq!(p.refcount(), 1);
        assert!(dc.get(check.handle()).unwrap().packet().is_some());
        drop(p);
        assert!(dc.get(check.handle()).unwrap().packet().is_none());
        assert_eq!(pool.live_buffers(), 0);
    }

    #[test]
    fn held_packet_lifecycle() {
        let pool = PacketPool::new(4);
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let p = packet(&pool, b"OH2XYZ>APRS,WIDE1-1:>status", now);
        let check = dc.check_or_hold(&p, now);
        assert!(!check.is_dupe());
        assert_eq!(p.refcount(), 2);

        let q = packet(&pool, b"OH2XYZ>APRS,OH2RDP*:>status", now);
        assert!(dc.check_or_hold(&q, now).is_dupe());
        assert_eq!(q.refcount(), 1);
        assert_eq!(dc.get(check.handle()).unwrap().delayed_seen, 1);

        assert!(dc.due_held(Duration::seconds(5), now).is_empty());
        let due = dc.due_held(Duration::seconds(5), now + Duration::seconds(5));
        assert_eq!(due, vec![check.handle()]);

        let held = dc.take_held(check.handle()).unwrap();
        assert!(Packet::ptr_eq(&held, &p));
        drop(held);
        assert_eq!(p.refcount(), 1);
        assert!(dc.take_held(check.handle()).is_none());
        // record still suppresses copies
        assert!(dc.check_or_hold(&q, now + Duration::seconds(6)).is_dupe());
    }

    #[test]
    fn held_packet_released_on_remove_and_expiry() {
        let pool = PacketPool::new(4);
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let p = packet(&pool, b"OH2XYZ>APRS:one", now);
        let h = dc.check_or_hold(&p, now).handle();
        assert_eq!(p.refcount(), 2);
        assert!(dc.remove(h));
        assert_eq!(p.refcount(), 1);
        assert!(!dc.remove(h));

        let q = packet(&pool, b"OH2XYZ>APRS:two", now);
        dc.check_or_hold(&q, now);
        assert_eq!(q.refcount(), 2);
        dc.sweep(now + Duration::seconds(31));
        assert_eq!(q.refcount(), 1);
    }

    #[test]
    fn hash_match_alone_is_not_a_hit() {
        let mut dc = DupeChecker::with_retention_seconds(30);
        let now = t0();
        let address = canonical_address(b"OH2XYZ>APRS");
        let hash = keyhash(b">real", keyhash(&address, 0));
        let bucket = fold_to_bucket(hash, DUPECHECK_BUCKETS);

        // same hash and bucket, different bytes
        dc.table.push_tail(
            bucket,
            DupeRecord {
                hash,
                address: b"OH2ABC>APRS".to_vec(),
                payload: b">other".to_vec(),
                created_at: now,
                expires_at: now + Duration::seconds(30),
                seen: 1,
                delayed_seen: 0,
                packet: RecordPacket::None,
            },
        );
        dc.table.push_tail(
            bucket,
            DupeRecord {
                hash,
                address,
                payload: b">rea".to_vec(),
                created_at: now,
                expires_at: now + Duration::seconds(30),
                seen: 1,
                delayed_seen: 0,
                packet: RecordPacket::None,
            },
        );

        let first = dc.check_or_insert(b"OH2XYZ>APRS", b">real", now);
        assert!(!first.is_dupe());
        assert_eq!(dc.len(), 3);
        assert_eq!(dc.get(first.handle()).unwrap().payload(), b">real");

        let second = dc.check_or_insert(b"OH2XYZ>APRS", b">real", now);
        assert!(second.is_dupe());
        assert_eq!(second.handle(), first.handle());
    }

    #[test]
    fn retention_seconds_are_clamped() {
        let dc = DupeChecker::with_retention_seconds(u64::MAX);
        assert_eq!(dc.retention(), Duration::seconds(MAX_SECONDS as i64));
    }
}
