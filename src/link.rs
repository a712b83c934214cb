//! The link / weak-link manager (component G): strong and weak aliases
//! sharing one backing payload through a circular doubly-linked ring.
//!
//! The ring is realized as `prev`/`next` arena indices on the `Link`/
//! `WeakLink` slot variants themselves (see [`crate::slot::Slot`]), not as
//! `Arc`/`Weak` reference counting: the spec's topology (exactly one
//! anchor, re-anchoring by mutating a link's slot type in place, staleness
//! propagated to every weak node on last-strong-drop) has no `Arc`/`Weak`
//! equivalent, since those primitives have no notion of a ring or of
//! "become the owner" mutation. Every ring walk is bounded by the owning
//! manager's `slot_count`, so a malformed ring (e.g. two nodes pointing at
//! each other but never at an anchor) fails cleanly instead of looping
//! forever (§8 Property 5).

use crate::error::{Error, Result};
use crate::slot::SlotRef;

/// The ring-membership fields carried by a `Link` or `WeakLink` slot.
#[derive(Debug, Clone, Copy)]
pub struct RingLink {
    /// The slot this link ultimately aliases (may be another Link in the
    /// ring; the anchor is found by walking `next` until a non-Link,
    /// non-WeakLink slot is reached).
    pub target: SlotRef,
    /// Previous node in the ring (may be the anchor's own "self" slot).
    pub prev: SlotRef,
    /// Next node in the ring.
    pub next: SlotRef,
}

/// Classification of what a ring walk found, returned by
/// [`RingWalk::classify`] so callers can decide whether to promote a link
/// to anchor, mark weak links stale, or fail cleanly on corruption.
pub enum RingShape {
    /// A single slot with no ring membership at all.
    SingleAnchor,
    /// A proper ring: one anchor, followed by zero or more strong links
    /// and zero or more weak links, in visitation order starting just after
    /// the anchor.
    Ring {
        /// The anchor's own slot reference.
        anchor: SlotRef,
        /// Strong `Link` nodes in the ring, in ring order.
        strong: Vec<SlotRef>,
        /// Weak `WeakLink` nodes in the ring, in ring order.
        weak: Vec<SlotRef>,
    },
}

/// An abstract view of "the slot storage for some manager", so ring
/// operations can walk across manager boundaries without this module
/// depending on [`crate::manager::ResourceManager`] directly (which would
/// be a dependency cycle, since the manager orchestrates path/load/pool
/// concerns on top of the slot table and link ring both).
pub trait SlotAccess {
    /// True if the slot at `r` is a ring node (`Link` or `WeakLink`), vs. an
    /// anchor-capable slot or `Unused`.
    fn is_link_node(&self, r: SlotRef) -> bool;
    /// True if the slot at `r` is a `WeakLink`.
    fn is_weak(&self, r: SlotRef) -> bool;
    /// Ring fields of the slot at `r`. Also defined for anchor-capable slots
    /// (backed by storage outside the slot itself, since those variants have
    /// no ring field of their own): `None` means "not currently part of any
    /// ring", whether `r` is an anchor nothing links to yet or a slot that
    /// was never a ring member at all.
    fn ring(&self, r: SlotRef) -> Option<RingLink>;
    /// Overwrites the ring fields at `r`, anchor or `Link`/`WeakLink` alike.
    fn set_ring(&mut self, r: SlotRef, ring: RingLink);
    /// Marks the `WeakLink` at `r` stale and clears its payload view.
    fn mark_stale(&mut self, r: SlotRef);
    /// Total slot count of the manager owning `r`, used to bound ring
    /// walks. Cross-manager rings bound each hop by the *target* manager's
    /// count, which is always ≥ 1, so the overall walk is still finite.
    fn slot_count_of(&self, r: SlotRef) -> usize;
    /// Promotes the slot at `r` (currently a `Link`) to anchor status,
    /// taking ownership of `payload_source`'s payload. Used when the
    /// previous anchor is freed and a strong link must become the new
    /// anchor.
    fn promote_to_anchor(&mut self, r: SlotRef, payload_source: SlotRef);
}

/// Walks the ring starting from `start`, bounded by `start`'s manager's
/// slot count, classifying its shape.
///
/// Returns [`Error::Corrupted`] if the walk exceeds the bound without
/// reaching back to `start` or finding a non-link slot, which is the
/// cycle-termination guarantee required by §4.7/§8 Property 5.
pub fn walk(access: &impl SlotAccess, start: SlotRef) -> Result<RingShape> {
    let mut cursor = if access.is_link_node(start) {
        start
    } else {
        match access.ring(start) {
            None => return Ok(RingShape::SingleAnchor),
            Some(ring) => ring.next,
        }
    };

    let bound = access.slot_count_of(start).max(1);
    let mut strong = Vec::new();
    let mut weak = Vec::new();
    let mut steps = 0usize;

    loop {
        if steps > bound {
            return Err(Error::Corrupted(
                "link ring exceeded slot_count steps without reaching an anchor".into(),
            ));
        }
        steps += 1;

        if !access.is_link_node(cursor) {
            // Reached the anchor.
            return Ok(RingShape::Ring {
                anchor: cursor,
                strong,
                weak,
            });
        }

        if access.is_weak(cursor) {
            weak.push(cursor);
        } else {
            strong.push(cursor);
        }

        let ring = access
            .ring(cursor)
            .ok_or_else(|| Error::Corrupted("ring node missing ring fields".into()))?;
        cursor = ring.next;

        if cursor.manager == start.manager && cursor.index == start.index && steps > 1 {
            // Back at the start without ever finding a non-link slot: the
            // ring has no anchor. Treat as corruption rather than looping.
            return Err(Error::Corrupted(
                "link ring has no anchor (cycle of link nodes only)".into(),
            ));
        }
    }
}

/// Splices `new_node` into the ring containing `anchor`, immediately after
/// the anchor, as a strong (`is_weak = false`) or weak link.
///
/// Per §4.7, this is legal even while `anchor`'s backing load is still in
/// progress: the new node simply joins the ring and observes the payload
/// once the anchor's load completes.
pub fn insert(access: &mut impl SlotAccess, anchor: SlotRef, new_node: SlotRef, is_weak: bool) {
    let _ = is_weak; // classification lives in the slot variant itself.
    let anchor_ring = access.ring(anchor).unwrap_or(RingLink {
        target: anchor,
        prev: anchor,
        next: anchor,
    });
    let old_next = anchor_ring.next;

    access.set_ring(
        new_node,
        RingLink {
            target: anchor,
            prev: anchor,
            next: old_next,
        },
    );
    access.set_ring(
        anchor,
        RingLink {
            target: anchor,
            prev: anchor_ring.prev,
            next: new_node,
        },
    );
    if let Some(mut old_next_ring) = access.ring(old_next) {
        old_next_ring.prev = new_node;
        access.set_ring(old_next, old_next_ring);
    }
}

/// Removes `anchor` from service (its slot is about to be freed),
/// re-anchoring the first remaining strong link if any, or marking every
/// remaining weak link stale and dropping the payload otherwise.
///
/// Returns the slot (if any) that was promoted to anchor, so the caller can
/// transfer payload ownership into it.
pub fn remove_anchor(access: &mut impl SlotAccess, anchor: SlotRef) -> Result<Option<SlotRef>> {
    match walk(access, anchor)? {
        RingShape::SingleAnchor => Ok(None),
        RingShape::Ring { strong, weak, .. } => {
            if let Some((&new_anchor, rest)) = strong.split_first() {
                access.promote_to_anchor(new_anchor, anchor);
                let members: Vec<SlotRef> = rest.iter().chain(weak.iter()).copied().collect();
                if members.is_empty() {
                    access.set_ring(
                        new_anchor,
                        RingLink {
                            target: new_anchor,
                            prev: new_anchor,
                            next: new_anchor,
                        },
                    );
                } else {
                    let first = members[0];
                    let last = *members.last().expect("non-empty");
                    access.set_ring(
                        new_anchor,
                        RingLink {
                            target: new_anchor,
                            prev: last,
                            next: first,
                        },
                    );
                    for (i, node) in members.iter().enumerate() {
                        let prev = if i == 0 { new_anchor } else { members[i - 1] };
                        let next = members.get(i + 1).copied().unwrap_or(new_anchor);
                        access.set_ring(
                            *node,
                            RingLink {
                                target: new_anchor,
                                prev,
                                next,
                            },
                        );
                    }
                }
                Ok(Some(new_anchor))
            } else {
                for w in weak {
                    access.mark_stale(w);
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Clone)]
    enum TestSlot {
        Anchor(Option<RingLink>),
        Strong(RingLink),
        Weak(RingLink, bool),
    }

    struct TestAccess {
        slots: HashMap<u32, TestSlot>,
        manager: crate::slot::ManagerId,
    }

    impl TestAccess {
        fn new(manager_id: u32) -> Self {
            TestAccess {
                slots: HashMap::new(),
                manager: crate::slot::ManagerId(manager_id),
            }
        }
        fn r(&self, index: u32) -> SlotRef {
            SlotRef {
                manager: self.manager,
                index,
            }
        }
    }

    impl SlotAccess for TestAccess {
        fn is_link_node(&self, r: SlotRef) -> bool {
            matches!(
                self.slots.get(&r.index),
                Some(TestSlot::Strong(_)) | Some(TestSlot::Weak(_, _))
            )
        }
        fn is_weak(&self, r: SlotRef) -> bool {
            matches!(self.slots.get(&r.index), Some(TestSlot::Weak(_, _)))
        }
        fn ring(&self, r: SlotRef) -> Option<RingLink> {
            match self.slots.get(&r.index) {
                Some(TestSlot::Strong(ring)) => Some(*ring),
                Some(TestSlot::Weak(ring, _)) => Some(*ring),
                Some(TestSlot::Anchor(ring)) => *ring,
                None => None,
            }
        }
        fn set_ring(&mut self, r: SlotRef, ring: RingLink) {
            match self.slots.get_mut(&r.index) {
                Some(TestSlot::Strong(old)) => *old = ring,
                Some(TestSlot::Weak(old, _)) => *old = ring,
                Some(TestSlot::Anchor(old)) => *old = Some(ring),
                None => {}
            }
        }
        fn mark_stale(&mut self, r: SlotRef) {
            if let Some(TestSlot::Weak(_, stale)) = self.slots.get_mut(&r.index) {
                *stale = true;
            }
        }
        fn slot_count_of(&self, _r: SlotRef) -> usize {
            self.slots.len().max(1)
        }
        fn promote_to_anchor(&mut self, r: SlotRef, _payload_source: SlotRef) {
            self.slots.insert(r.index, TestSlot::Anchor(None));
        }
    }

    #[test]
    fn single_anchor_has_no_ring() {
        let mut access = TestAccess::new(1);
        access.slots.insert(0, TestSlot::Anchor(None));
        let anchor = access.r(0);
        assert!(matches!(walk(&access, anchor).unwrap(), RingShape::SingleAnchor));
    }

    #[test]
    fn insert_strong_and_weak_then_remove_anchor_reanchors() {
        let mut access = TestAccess::new(1);
        access.slots.insert(0, TestSlot::Anchor(None));
        let anchor = access.r(0);
        access.slots.insert(
            1,
            TestSlot::Strong(RingLink {
                target: anchor,
                prev: anchor,
                next: anchor,
            }),
        );
        let strong = access.r(1);
        insert(&mut access, anchor, strong, false);

        access.slots.insert(
            2,
            TestSlot::Weak(
                RingLink {
                    target: anchor,
                    prev: anchor,
                    next: anchor,
                },
                false,
            ),
        );
        let weak = access.r(2);
        insert(&mut access, anchor, weak, true);

        match walk(&access, anchor).unwrap() {
            RingShape::Ring { strong: s, weak: w, .. } => {
                assert_eq!(s.len(), 1);
                assert_eq!(w.len(), 1);
            }
            RingShape::SingleAnchor => panic!("expected a ring"),
        }

        let promoted = remove_anchor(&mut access, anchor).unwrap();
        assert_eq!(promoted, Some(strong));
        assert!(matches!(access.slots.get(&1), Some(TestSlot::Anchor(_))));

        // Now free the promoted anchor too: no strong links remain, so the
        // weak link must go stale.
        let promoted = remove_anchor(&mut access, strong).unwrap();
        assert_eq!(promoted, None);
        assert!(matches!(access.slots.get(&2), Some(TestSlot::Weak(_, true))));
    }

    #[test]
    fn corrupted_ring_with_no_anchor_fails_cleanly() {
        let mut access = TestAccess::new(1);
        // Two strong nodes pointing at each other, never at a non-link
        // slot.
        let a = access.r(0);
        let b = access.r(1);
        access.slots.insert(
            0,
            TestSlot::Strong(RingLink {
                target: a,
                prev: b,
                next: b,
            }),
        );
        access.slots.insert(
            1,
            TestSlot::Strong(RingLink {
                target: a,
                prev: a,
                next: a,
            }),
        );
        let result = walk(&access, a);
        assert!(result.is_err());
    }
}
