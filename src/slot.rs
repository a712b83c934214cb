//! The resource slot table (component E): a per-manager array of typed
//! slots with grow-in-place semantics, a free list for tombstone reuse, and
//! the storage half of the link ring (component G owns the ring *topology*
//! in [`crate::link`]; this module owns where the nodes live).

use std::num::NonZeroU32;
use std::sync::Arc;

use crate::link::RingLink;
use crate::load::LoadHandle;

/// A process-wide identifier for a registered [`crate::manager::ResourceManager`],
/// stable for the manager's lifetime. Used as the manager half of a
/// cross-manager link target, so slot-array growth never requires chasing
/// pointers into another manager's memory (§9 Design Notes: "arena indices
/// (manager-id, slot-index) rather than raw pointers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerId(pub(crate) u32);

/// A 1-based, stable-for-the-slot's-lifetime handle to a resource within one
/// manager. Reused after the slot becomes [`Slot::Unused`] again.
pub type ResourceId = NonZeroU32;

/// An arena-index reference to a slot in (possibly another) manager: the
/// representation links and weak-links use instead of a raw pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    /// The manager the target slot lives in.
    pub manager: ManagerId,
    /// 0-based index into that manager's slot array.
    pub index: u32,
}

/// An opaque, caller-owned payload handle (texture/font/sound). The
/// resource manager never interprets the value; it only stores it and
/// drops it (via the supplied `Drop` impl, if any) when the owning slot is
/// freed.
pub type Handle = u64;

/// A typed resource slot.
pub enum Slot {
    /// Available for allocation. `next_free` chains unused slots into a
    /// freelist so `create_*`/`load_*` can find the next free index in
    /// O(1).
    Unused { next_free: Option<u32> },
    /// An owned byte buffer.
    Data { bytes: Arc<Vec<u8>>, mark_created: u32 },
    /// An opaque texture handle.
    Texture { handle: Handle, mark_created: u32 },
    /// An opaque font handle.
    Font { handle: Handle, mark_created: u32 },
    /// An opaque sound handle.
    Sound { handle: Handle, mark_created: u32 },
    /// A streamed sound: a handle plus the file range backing it.
    StreamedSound {
        handle: Handle,
        file_ref: SlotRef,
        offset: u64,
        length: u64,
        mark_created: u32,
    },
    /// A file cursor: position is mutated in place by `read_file`/`seek`.
    File {
        file_ref: SlotRef,
        base_offset: u64,
        length: u64,
        current_position: u64,
        mark_created: u32,
    },
    /// A strong alias; part of a link ring anchored at some non-Link slot.
    Link { ring: RingLink, mark_created: u32 },
    /// A weak alias; part of a link ring while live, `stale` once the last
    /// strong reference in the ring is gone.
    WeakLink {
        ring: RingLink,
        stale: bool,
        mark_created: u32,
    },
    /// A load is in progress for this slot; the payload, once ready, is
    /// written in place by committing over this variant (never observed by
    /// `get_*`, which checks `load.phase()` first).
    Pending { load: LoadHandle, mark_created: u32 },
    /// A load that terminated in `Failed`; a read-only marker so `get_*`
    /// keeps returning `None` and the slot is never re-promoted.
    FailedLoad { mark_created: u32 },
}

impl Slot {
    /// The `mark_created` carried by every non-`Unused` variant.
    pub fn mark_created(&self) -> Option<u32> {
        match self {
            Slot::Unused { .. } => None,
            Slot::Data { mark_created, .. }
            | Slot::Texture { mark_created, .. }
            | Slot::Font { mark_created, .. }
            | Slot::Sound { mark_created, .. }
            | Slot::StreamedSound { mark_created, .. }
            | Slot::File { mark_created, .. }
            | Slot::Link { mark_created, .. }
            | Slot::WeakLink { mark_created, .. }
            | Slot::Pending { mark_created, .. }
            | Slot::FailedLoad { mark_created } => Some(*mark_created),
        }
    }

    /// True if this slot variant owns a payload directly (i.e. it can serve
    /// as a ring anchor).
    pub fn is_anchor_capable(&self) -> bool {
        !matches!(
            self,
            Slot::Unused { .. } | Slot::Link { .. } | Slot::WeakLink { .. }
        )
    }
}

/// The slot array plus its free list, owned by one manager.
///
/// Growth doubles capacity and copies existing slots into the new array;
/// because external references are arena indices `(ManagerId, slot_index)`
/// rather than pointers into this array, growth never requires rewriting
/// any other manager's state (§3 Invariant 7, realized per the §9 redesign
/// note).
pub struct SlotTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    /// The ring-head pointer for whichever slot is currently an anchor, kept
    /// out of [`Slot`] itself since anchor-capable variants (`Data`,
    /// `Texture`, ...) have no ring field of their own — only `Link`/
    /// `WeakLink` embed one. Without persisting *something* at the anchor's
    /// index, a second `link()` call against the same anchor would have no
    /// way to chain onto the first link's position rather than starting a
    /// fresh, disconnected one-node ring. `None` for every index that is not
    /// currently an anchor with at least one link pointing at it.
    anchor_rings: Vec<Option<RingLink>>,
}

impl SlotTable {
    /// Creates a table with the given initial capacity (minimum 1), every
    /// slot `Unused`.
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next_free = if i + 1 < capacity {
                Some(i as u32 + 1)
            } else {
                None
            };
            slots.push(Slot::Unused { next_free });
        }
        SlotTable {
            slots,
            free_head: Some(0),
            anchor_rings: vec![None; capacity],
        }
    }

    /// The anchor-side ring head for `index`, if any link currently points
    /// at it.
    pub fn anchor_ring(&self, index: u32) -> Option<RingLink> {
        self.anchor_rings.get(index as usize).copied().flatten()
    }

    /// Sets (or clears, with `None`) the anchor-side ring head for `index`.
    pub fn set_anchor_ring(&mut self, index: u32, ring: Option<RingLink>) {
        if let Some(slot) = self.anchor_rings.get_mut(index as usize) {
            *slot = ring;
        }
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocates a slot, growing the array (doubling) if none is free, and
    /// returns its 0-based index. The caller is responsible for writing the
    /// real variant into `self[index]` immediately.
    pub fn allocate(&mut self) -> u32 {
        if self.free_head.is_none() {
            self.grow();
        }
        let index = self.free_head.expect("grow() must produce a free slot");
        match &self.slots[index as usize] {
            Slot::Unused { next_free } => {
                self.free_head = *next_free;
            }
            _ => unreachable!("free_head must point at an Unused slot"),
        }
        index
    }

    fn grow(&mut self) {
        let old_len = self.slots.len();
        let new_len = (old_len * 2).max(1);
        for i in old_len..new_len {
            let next_free = if i + 1 < new_len {
                Some(i as u32 + 1)
            } else {
                None
            };
            self.slots.push(Slot::Unused { next_free });
        }
        self.anchor_rings.resize(new_len, None);
        self.free_head = Some(old_len as u32);
    }

    /// Returns a slot by 0-based index.
    pub fn get(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    /// Returns a mutable slot by 0-based index.
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Slot> {
        self.slots.get_mut(index as usize)
    }

    /// Writes `slot` at `index`, overwriting whatever was there. Used both
    /// for initial commit after `allocate()` and for promotions/demotions
    /// during ring maintenance.
    pub fn set(&mut self, index: u32, slot: Slot) {
        self.slots[index as usize] = slot;
    }

    /// Frees `index`: the slot becomes `Unused` and is pushed onto the
    /// freelist head. Idempotent: freeing an already-`Unused` slot is a
    /// no-op (§8 Property 10).
    pub fn free(&mut self, index: u32) {
        if matches!(self.slots[index as usize], Slot::Unused { .. }) {
            return;
        }
        self.slots[index as usize] = Slot::Unused {
            next_free: self.free_head,
        };
        self.free_head = Some(index);
        self.anchor_rings[index as usize] = None;
    }

    /// Number of slots, used by ring-walk termination bounds (§8 Property
    /// 5: no ring traversal exceeds `slot_count` steps).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_reuses_freed_slots() {
        let mut table = SlotTable::new(1);
        let a = table.allocate();
        table.set(a, Slot::Data { bytes: Arc::new(vec![1]), mark_created: 1 });
        table.free(a);
        let b = table.allocate();
        assert_eq!(a, b);
    }

    #[test]
    fn allocate_grows_when_full() {
        let mut table = SlotTable::new(1);
        let a = table.allocate();
        table.set(a, Slot::Data { bytes: Arc::new(vec![1]), mark_created: 1 });
        assert_eq!(table.capacity(), 1);
        let b = table.allocate();
        assert!(table.capacity() >= 2);
        assert_ne!(a, b);
    }

    #[test]
    fn double_free_is_noop() {
        let mut table = SlotTable::new(2);
        let a = table.allocate();
        table.set(a, Slot::Data { bytes: Arc::new(vec![1]), mark_created: 1 });
        table.free(a);
        table.free(a); // must not corrupt the freelist
        let b = table.allocate();
        let c = table.allocate();
        assert_ne!(b, c);
    }
}
