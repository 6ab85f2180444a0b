//! Reference counted packet buffers and the size-classed pool they come from.
//!
//! A packet owns one byte buffer holding its TNC2 text followed by the AX.25
//! frame it was decoded from (empty for APRS-IS packets that have no AX.25
//! form). [`PacketMut`] is the single-owner, writable stage used while the
//! pipeline fills the packet in; [`Packet`] is the shared, read-only handle
//! handed to caches and consumers. Cloning a `Packet` is the acquire
//! operation, dropping it is the release. When the last handle goes away the
//! byte buffer goes back to its size class in the pool.

use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::packet_type::{PacketFlags, PacketType};
use crate::position::Position;
use crate::tnc2::Tnc2Header;

/// Buffer size classes, smallest first. The last one is the hard cap on
/// TNC2 plus AX.25 length.
pub const SIZE_CLASSES: [usize; 3] = [256, 768, 2150];
pub const MAX_PACKET_LEN: usize = SIZE_CLASSES[SIZE_CLASSES.len() - 1];

/// Free buffers kept per size class; anything beyond goes back to the allocator.
const MAX_FREE_PER_CLASS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocationFailed {
    #[error("packet of {0} bytes exceeds the {max} byte limit", max = MAX_PACKET_LEN)]
    TooLarge(usize),
    #[error("packet pool exhausted at {0} live buffers")]
    Exhausted(usize),
}

/// Where a packet came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketSource {
    Rf { port: String, subif: u8 },
    AprsIs,
}

impl PacketSource {
    pub fn is_rf(&self) -> bool {
        matches!(self, PacketSource::Rf { .. })
    }

    /// Label value for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PacketSource::Rf { .. } => "rf",
            PacketSource::AprsIs => "aprsis",
        }
    }
}

fn size_class(len: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&class| len <= class)
}

#[derive(Debug)]
struct PoolState {
    free: [Vec<Vec<u8>>; SIZE_CLASSES.len()],
    live: usize,
    max_buffers: usize,
}

impl PoolState {
    fn recycle(&mut self, mut buf: Vec<u8>) {
        debug_assert!(self.live > 0, "packet pool live count underflow");
        self.live = self.live.saturating_sub(1);
        metrics::gauge!("pool.live_buffers").set(self.live as f64);

        // a buffer is filed under the largest class it can still serve
        let class = SIZE_CLASSES
            .iter()
            .rposition(|&class| buf.capacity() >= class);
        if let Some(class) = class
            && self.free[class].len() < MAX_FREE_PER_CLASS
        {
            buf.clear();
            self.free[class].push(buf);
        }
    }
}

/// Single-threaded pool of packet buffers.
///
/// Cheap to clone; clones share the same free lists and live-buffer limit.
#[derive(Debug, Clone)]
pub struct PacketPool {
    state: Rc<RefCell<PoolState>>,
}

impl PacketPool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(PoolState {
                free: Default::default(),
                live: 0,
                max_buffers,
            })),
        }
    }

    /// Allocate a zero-filled packet with room for both views.
    ///
    /// Fails when the total exceeds [`MAX_PACKET_LEN`] or when `max_buffers`
    /// packets are already alive. Either way the caller drops the packet.
    pub fn allocate(
        &self,
        tnc2_len: usize,
        ax25_len: usize,
        source: PacketSource,
        received_at: DateTime<Utc>,
    ) -> Result<PacketMut, AllocationFailed> {
        let total = tnc2_len + ax25_len;
        let Some(class) = size_class(total) else {
            metrics::counter!("gateway.pool.allocation_failed").increment(1);
            return Err(AllocationFailed::TooLarge(total));
        };

        let mut state = self.state.borrow_mut();
        if state.live >= state.max_buffers {
            metrics::counter!("gateway.pool.allocation_failed").increment(1);
            warn!("Packet pool exhausted ({} live buffers)", state.live);
            return Err(AllocationFailed::Exhausted(state.live));
        }

        let mut buf = state.free[class]
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(SIZE_CLASSES[class]));
        buf.resize(total, 0);
        state.live += 1;
        metrics::gauge!("pool.live_buffers").set(state.live as f64);

        Ok(PacketMut {
            data: PacketData {
                buf,
                tnc2_len,
                header: Tnc2Header::default(),
                received_at,
                source,
                is_aprs: false,
                digi_like_aprs: false,
                packet_type: PacketType::empty(),
                flags: Cell::new(PacketFlags::empty()),
                position: None,
                symbol: [b' ', b' '],
                name: None,
                killed: false,
                recipient: None,
                recipient_position: None,
                pool: Rc::downgrade(&self.state),
            },
        })
    }

    /// Packets currently alive (allocated and not yet fully released).
    pub fn live_buffers(&self) -> usize {
        self.state.borrow().live
    }

    /// Buffers parked on the free lists.
    pub fn free_buffers(&self) -> usize {
        self.state.borrow().free.iter().map(Vec::len).sum()
    }
}

/// Contents of a packet. Reached through [`Packet`] or [`PacketMut`].
#[derive(Debug)]
pub struct PacketData {
    buf: Vec<u8>,
    tnc2_len: usize,
    header: Tnc2Header,
    pub received_at: DateTime<Utc>,
    pub source: PacketSource,
    /// Information field decoded as APRS
    pub is_aprs: bool,
    /// APRS payload, or a UI/0xF0 frame a digipeater relays like APRS even
    /// though its payload did not classify
    pub digi_like_aprs: bool,
    pub packet_type: PacketType,
    flags: Cell<PacketFlags>,
    position: Option<Position>,
    /// Symbol table and symbol code, spaces when unknown
    pub symbol: [u8; 2],
    /// Object or item name
    pub name: Option<String>,
    /// Object or item carries the kill marker
    pub killed: bool,
    /// Message addressee
    pub recipient: Option<String>,
    /// Last known position of the addressee, from the history cache
    pub recipient_position: Option<Position>,
    pool: Weak<RefCell<PoolState>>,
}

impl PacketData {
    pub fn tnc2(&self) -> &[u8] {
        &self.buf[..self.tnc2_len]
    }

    pub fn ax25(&self) -> &[u8] {
        &self.buf[self.tnc2_len..]
    }

    pub fn header(&self) -> &Tnc2Header {
        &self.header
    }

    pub fn srccall(&self) -> &[u8] {
        self.header.srccall(self.tnc2())
    }

    pub fn dstcall(&self) -> &[u8] {
        self.header.dstcall(self.tnc2())
    }

    /// `SRC>DST,VIA...` without the closing `:`.
    pub fn address(&self) -> &[u8] {
        self.header.address(self.tnc2())
    }

    pub fn info(&self) -> &[u8] {
        self.header.info(self.tnc2())
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags.get()
    }

    pub fn mark_dupe(&self) {
        self.flags.set(self.flags.get() | PacketFlags::DUPE);
    }

    pub fn is_dupe(&self) -> bool {
        self.flags.get().contains(PacketFlags::DUPE)
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn srccall_str(&self) -> String {
        String::from_utf8_lossy(self.srccall()).into_owned()
    }

    pub fn tnc2_str(&self) -> String {
        String::from_utf8_lossy(self.tnc2()).into_owned()
    }
}

impl Drop for PacketData {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade()
            && let Ok(mut state) = pool.try_borrow_mut()
        {
            state.recycle(std::mem::take(&mut self.buf));
        }
    }
}

/// A packet that is still being filled in. Exactly one owner.
#[derive(Debug)]
pub struct PacketMut {
    data: PacketData,
}

impl PacketMut {
    pub fn tnc2_mut(&mut self) -> &mut [u8] {
        let len = self.data.tnc2_len;
        &mut self.data.buf[..len]
    }

    pub fn ax25_mut(&mut self) -> &mut [u8] {
        let len = self.data.tnc2_len;
        &mut self.data.buf[len..]
    }

    pub fn set_header(&mut self, header: Tnc2Header) {
        debug_assert!(header.info_start <= self.data.tnc2_len);
        self.data.header = header;
    }

    /// Set or clear the position, keeping HASPOS in step.
    pub fn set_position(&mut self, position: Option<Position>) {
        let mut flags = self.data.flags.get();
        flags.set(PacketFlags::HASPOS, position.is_some());
        self.data.flags.set(flags);
        self.data.position = position;
    }

    /// Hand the packet over to shared ownership, refcount 1.
    pub fn freeze(self) -> Packet {
        Packet(Rc::new(self.data))
    }
}

impl Deref for PacketMut {
    type Target = PacketData;

    fn deref(&self) -> &PacketData {
        &self.data
    }
}

impl DerefMut for PacketMut {
    fn deref_mut(&mut self) -> &mut PacketData {
        &mut self.data
    }
}

/// Shared handle to a finished packet.
///
/// `clone()` acquires, drop releases.
#[derive(Debug, Clone)]
pub struct Packet(Rc<PacketData>);

impl Packet {
    /// Take another reference. Same as `clone()`, named for call sites that
    /// hand the packet to a new holder.
    pub fn acquire(&self) -> Packet {
        self.clone()
    }

    /// Give up this reference.
    pub fn release(self) {
        drop(self);
    }

    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn ptr_eq(a: &Packet, b: &Packet) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Non-owning reference, for records that observe a packet without
    /// keeping it alive.
    pub fn downgrade(&self) -> WeakPacket {
        WeakPacket(Rc::downgrade(&self.0))
    }
}

impl Deref for Packet {
    type Target = PacketData;

    fn deref(&self) -> &PacketData {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct WeakPacket(Weak<PacketData>);

impl WeakPacket {
    pub fn upgrade(&self) -> Option<Packet> {
        self.0.upgrade().map(Packet)
    }
}
