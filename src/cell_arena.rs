//! Slab storage for cache cells, plus the hash-chained table both caches
//! are built on.
//!
//! Cells live in one `Vec` with a free list threaded through the vacant
//! slots, so a steady-state cache stops allocating once it has grown to its
//! working size. Handles carry a generation so a handle kept across a
//! removal cannot reach the cell that later reuses the slot.

/// Handle to a cell in a [`CellArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

#[derive(Debug)]
pub struct CellArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for CellArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CellArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated (live plus free).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn insert(&mut self, value: T) -> CellId {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (generation.wrapping_add(1), *next_free),
                Slot::Occupied { .. } => {
                    debug_assert!(false, "free list points at an occupied slot");
                    return self.push_new(value);
                }
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            return CellId { index, generation };
        }
        self.push_new(value)
    }

    fn push_new(&mut self, value: T) -> CellId {
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        CellId {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, id: CellId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: id.generation,
            next_free: self.free_head,
        };
        let old = std::mem::replace(slot, vacant);
        self.free_head = Some(id.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, id: CellId) -> Option<&T> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    CellId {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

#[derive(Debug)]
struct Link<T> {
    value: T,
    next: Option<CellId>,
}

/// Fixed number of singly linked bucket chains over one [`CellArena`].
///
/// New cells are appended at the tail of their chain. Removal during a walk
/// is done by [`ChainedTable::unlink_where`], which is the primitive both
/// caches use for lazy expiry.
#[derive(Debug)]
pub struct ChainedTable<T> {
    arena: CellArena<Link<T>>,
    heads: Vec<Option<CellId>>,
}

impl<T> ChainedTable<T> {
    pub fn new(buckets: usize) -> Self {
        assert!(buckets > 0, "table needs at least one bucket");
        Self {
            arena: CellArena::new(),
            heads: vec![None; buckets],
        }
    }

    pub fn buckets(&self) -> usize {
        self.heads.len()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, id: CellId) -> Option<&T> {
        self.arena.get(id).map(|link| &link.value)
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut T> {
        self.arena.get_mut(id).map(|link| &mut link.value)
    }

    pub fn push_tail(&mut self, bucket: usize, value: T) -> CellId {
        let id = self.arena.insert(Link { value, next: None });
        match self.tail_of(bucket) {
            Some(tail) => {
                if let Some(link) = self.arena.get_mut(tail) {
                    link.next = Some(id);
                }
            }
            None => self.heads[bucket] = Some(id),
        }
        id
    }

    fn tail_of(&self, bucket: usize) -> Option<CellId> {
        let mut cur = self.heads[bucket]?;
        let mut steps = 0;
        while let Some(next) = self.arena.get(cur).and_then(|link| link.next) {
            steps += 1;
            debug_assert!(steps <= self.arena.len(), "cycle in bucket chain {}", bucket);
            cur = next;
        }
        Some(cur)
    }

    /// First cell in `bucket` whose value satisfies `pred`, in chain order.
    pub fn find(&self, bucket: usize, mut pred: impl FnMut(&T) -> bool) -> Option<CellId> {
        self.chain(bucket)
            .find(|(_, value)| pred(value))
            .map(|(id, _)| id)
    }

    /// Walk one chain in order.
    pub fn chain(&self, bucket: usize) -> impl Iterator<Item = (CellId, &T)> {
        let mut cur = self.heads[bucket];
        let mut steps = 0usize;
        let limit = self.arena.len();
        std::iter::from_fn(move || {
            let id = cur?;
            steps += 1;
            debug_assert!(steps <= limit, "cycle in bucket chain");
            let link = self.arena.get(id)?;
            cur = link.next;
            Some((id, &link.value))
        })
    }

    /// Unlink and return every cell of `bucket` matching `pred`, keeping the
    /// order of the survivors.
    pub fn unlink_where(&mut self, bucket: usize, mut pred: impl FnMut(CellId, &T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut prev: Option<CellId> = None;
        let mut cur = self.heads[bucket];
        let mut steps = 0usize;
        let limit = self.arena.len();

        while let Some(id) = cur {
            steps += 1;
            debug_assert!(steps <= limit, "cycle in bucket chain {}", bucket);
            let Some(link) = self.arena.get(id) else {
                debug_assert!(false, "dangling link in bucket chain {}", bucket);
                break;
            };
            let next = link.next;
            if pred(id, &link.value) {
                match prev {
                    Some(p) => {
                        if let Some(prev_link) = self.arena.get_mut(p) {
                            prev_link.next = next;
                        }
                    }
                    None => self.heads[bucket] = next,
                }
                if let Some(link) = self.arena.remove(id) {
                    removed.push(link.value);
                }
            } else {
                prev = Some(id);
            }
            cur = next;
        }
        removed
    }

    /// Unlink one specific cell.
    pub fn remove(&mut self, bucket: usize, id: CellId) -> Option<T> {
        self.unlink_where(bucket, |cell, _| cell == id).pop()
    }

    /// Every bucket, every cell.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &T)> {
        self.arena.iter().map(|(id, link)| (id, &link.value))
    }
}
