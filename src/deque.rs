//! The split deque (C2): a fixed-capacity array of [`TaskSlot`]s with the
//! `(head, split, tail)` triple that partitions it into private, shared and
//! stolen regions.
//!
//! `head` is owner-private. `tail` and `split` travel together as a single
//! packed `u64` atomic (`published`), because the steal protocol (C3) needs
//! to observe and CAS both at once: a thief must never advance `tail` past a
//! `split` it read in the same snapshot.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::task::TaskSlot;

#[inline]
fn pack(tail: u32, split: u32) -> u64 {
    u64::from(tail) | (u64::from(split) << 32)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// Returned by [`Deque::push`] when `head == capacity`. Fatal: the caller
/// should abort (§7), not retry.
#[derive(Debug, Clone, Copy)]
pub struct Overflow {
    pub capacity: usize,
}

/// Outcome of a thief's attempt to claim a slot at `tail` (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Claimed the slot at this index; the thief now owns it exclusively.
    Claimed(usize),
    /// `tail >= split`: nothing in the shared region to steal.
    Empty,
    /// Lost a race with a concurrent claim or an owner republish/grow/shrink.
    Busy,
}

/// A single worker's deque: its backing array plus the region boundaries.
pub struct Deque {
    slots: Box<[TaskSlot]>,
    capacity: usize,

    /// Private: only the owner reads or writes this.
    head: Cell<usize>,
    /// Published `(tail, split)`, read by thieves and written wholesale by
    /// the owner (republish/grow/shrink) or advanced by a thief's CAS. Every
    /// other worker's `try_steal_once` touches this on every steal attempt,
    /// so it gets its own cache line rather than sharing one with `head`.
    published: CachePadded<AtomicU64>,

    /// Owner's private view of "nothing left for thieves".
    allstolen_private: Cell<bool>,
    /// Thieves' public view of the same fact; the two are only ever flipped
    /// back to `false` together, during a republish (§3 invariant 5).
    allstolen_public: CachePadded<AtomicBool>,
    /// Set by a thief that found `tail >= split`, asking the owner to widen
    /// the shared region on its next push. Single-writer: thief sets, owner
    /// clears (§5).
    movesplit: CachePadded<AtomicBool>,
}

// Safety: `head` and `allstolen_private` are touched only by the deque's
// owning worker (§3 invariants 2-4); cross-thread access goes exclusively
// through `published`, `allstolen_public` and `movesplit`, which are atomic.
unsafe impl Sync for Deque {}

impl Deque {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, TaskSlot::new);
        Deque {
            slots: slots.into_boxed_slice(),
            capacity,
            head: Cell::new(0),
            published: CachePadded::new(AtomicU64::new(pack(0, 0))),
            allstolen_private: Cell::new(true),
            allstolen_public: CachePadded::new(AtomicBool::new(true)),
            movesplit: CachePadded::new(AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot(&self, idx: usize) -> &TaskSlot {
        &self.slots[idx]
    }

    /// Owner-private head index: the next free private slot.
    pub fn head(&self) -> usize {
        self.head.get()
    }

    pub fn set_head(&self, head: usize) {
        debug_assert!(head <= self.capacity);
        self.head.set(head);
    }

    /// Current `(tail, split)` as observed by an acquire load.
    pub fn published_snapshot(&self) -> (usize, usize) {
        let (tail, split) = unpack(self.published.load(Ordering::Acquire));
        (tail as usize, split as usize)
    }

    /// Write the task into the private slot at `head` and advance `head`,
    /// handling republish-on-allstolen and split growth (§4.2, §4.3).
    ///
    /// `install` must leave the slot's `thief` handle at `Task` (this is
    /// what [`TaskSlot::install`] does).
    ///
    /// Returns whether the push also widened the shared region (a grow in
    /// response to an earlier thief's [`Deque::request_growth`]), so callers
    /// can attribute the event for instrumentation (A2).
    pub fn push(&self, install: impl FnOnce(&TaskSlot)) -> Result<bool, Overflow> {
        let head = self.head.get();
        if head >= self.capacity {
            return Err(Overflow {
                capacity: self.capacity,
            });
        }

        install(&self.slots[head]);
        let new_head = head + 1;

        if self.allstolen_private.get() {
            // The deque looked empty to thieves; the task we just installed
            // becomes the sole shared task so the next thief has something
            // to find immediately, rather than waiting for a grow request.
            self.published
                .store(pack(head as u32, new_head as u32), Ordering::Release);
            self.allstolen_private.set(false);
            self.allstolen_public.store(false, Ordering::Release);
            self.movesplit.store(false, Ordering::Relaxed);
            self.head.set(new_head);
            return Ok(false);
        }

        self.head.set(new_head);
        let grew = self.maybe_grow(new_head);
        Ok(grew)
    }

    fn maybe_grow(&self, new_head: usize) -> bool {
        if !self.movesplit.load(Ordering::Acquire) {
            return false;
        }
        let (tail, split) = unpack(self.published.load(Ordering::Relaxed));
        let split = split as usize;
        let private = new_head.saturating_sub(split);
        if private > 1 {
            let new_split = split + (new_head - split) / 2;
            self.published
                .store(pack(tail, new_split as u32), Ordering::Release);
            self.movesplit.store(false, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Try to move `split` down to `new_split` to reclaim a task a thief
    /// hasn't gotten to yet (the slow-sync shrink in §4.5). Unlike
    /// republish/grow, this one races directly against a thief's tail CAS —
    /// if `tail` has already passed `new_split` by the time we'd write, a
    /// thief got there first and owns the slot; we report that back instead
    /// of clobbering its claim.
    pub fn try_shrink_below(&self, new_split: usize) -> bool {
        loop {
            let word = self.published.load(Ordering::Acquire);
            let (tail, split) = unpack(word);
            if tail as usize > new_split {
                return false;
            }
            if (split as usize) <= new_split {
                return true;
            }
            let new_word = pack(tail, new_split as u32);
            match self
                .published
                .compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Re-evaluate whether the deque now looks empty to thieves and, if so,
    /// flip both allstolen views so the next `push` republishes cleanly.
    pub fn note_possibly_empty(&self) {
        let (tail, split) = self.published_snapshot();
        if tail >= split && self.head.get() <= split {
            self.allstolen_private.set(true);
            self.allstolen_public.store(true, Ordering::Release);
        }
    }

    pub fn is_allstolen(&self) -> bool {
        self.allstolen_public.load(Ordering::Acquire)
    }

    /// Ask this deque's owner to widen the shared region on its next push.
    /// Called by a thief that found `tail >= split` here.
    pub fn request_growth(&self) {
        self.movesplit.store(true, Ordering::Release);
    }

    /// Thief side of the steal protocol (C3): attempt to claim the slot at
    /// `tail`. Returns `Empty` with no side effect if there is nothing
    /// shared, `Busy` if a concurrent edit invalidated the snapshot, or
    /// `Claimed(idx)` once the CAS has reserved the slot for this thief.
    pub fn claim(&self) -> ClaimOutcome {
        let word = self.published.load(Ordering::Acquire);
        let (tail, split) = unpack(word);
        if tail >= split {
            return ClaimOutcome::Empty;
        }
        let new_word = pack(tail + 1, split);
        match self
            .published
            .compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => ClaimOutcome::Claimed(tail as usize),
            Err(_) => ClaimOutcome::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_noop(deque: &Deque, n: i64) {
        deque
            .push(|slot| unsafe { slot.install(n, |n: i64| n) })
            .unwrap();
    }

    #[test]
    fn invariants_hold_after_pushes() {
        let deque = Deque::new(8);
        for i in 0..4 {
            push_noop(&deque, i);
        }
        let (tail, split) = deque.published_snapshot();
        assert!(tail <= split);
        assert!(split <= deque.head());
        assert!(deque.head() <= deque.capacity());
    }

    #[test]
    fn overflow_is_reported_at_capacity() {
        let deque = Deque::new(2);
        push_noop(&deque, 1);
        push_noop(&deque, 2);
        let err = deque
            .push(|slot| unsafe { slot.install(3i64, |n: i64| n) })
            .unwrap_err();
        assert_eq!(err.capacity, 2);
    }

    #[test]
    fn first_push_after_start_is_immediately_stealable() {
        let deque = Deque::new(8);
        assert!(deque.is_allstolen());
        push_noop(&deque, 1);
        let (tail, split) = deque.published_snapshot();
        assert_eq!(split - tail, 1, "freshly republished task must be shared");
    }

    #[test]
    fn claim_advances_tail_once() {
        let deque = Deque::new(8);
        push_noop(&deque, 1);
        push_noop(&deque, 2);
        deque.request_growth();
        push_noop(&deque, 3);

        match deque.claim() {
            ClaimOutcome::Claimed(idx) => assert_eq!(idx, 0),
            other => panic!("expected Claimed(0), got {other:?}"),
        }
        // The same tail slot cannot be claimed twice.
        let (tail, split) = deque.published_snapshot();
        assert!(tail <= split);
    }

    #[test]
    fn claim_on_empty_reports_empty() {
        let deque = Deque::new(8);
        assert_eq!(deque.claim(), ClaimOutcome::Empty);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        #[derive(Debug, Clone, Copy)]
        enum Op {
            Push,
            Claim,
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![Just(Op::Push), Just(Op::Claim)]
        }

        proptest! {
            /// Region ordering (`tail <= split <= head <= capacity`) and
            /// single-claim-per-slot must hold after every operation, for
            /// any interleaving of pushes and claims a thief might attempt.
            #[test]
            fn region_ordering_and_claim_uniqueness_hold(
                ops in prop::collection::vec(op_strategy(), 0..200)
            ) {
                let deque = Deque::new(64);
                let mut claimed = HashSet::new();
                let mut next_value = 0i64;

                for op in ops {
                    match op {
                        Op::Push => {
                            let installed = deque.push(|slot| unsafe {
                                slot.install(next_value, |n: i64| n)
                            });
                            if installed.is_ok() {
                                next_value += 1;
                            }
                        }
                        Op::Claim => {
                            if let ClaimOutcome::Claimed(idx) = deque.claim() {
                                prop_assert!(claimed.insert(idx), "slot {} claimed twice", idx);
                            }
                        }
                    }

                    let (tail, split) = deque.published_snapshot();
                    prop_assert!(tail <= split);
                    prop_assert!(split <= deque.head());
                    prop_assert!(deque.head() <= deque.capacity());
                }
            }
        }
    }

    #[test]
    fn growth_widens_shared_region_when_private_tasks_available() {
        let deque = Deque::new(8);
        push_noop(&deque, 1); // republished: tail=0 split=1 head=1
        push_noop(&deque, 2); // private region grows: head=2, split stays 1
        push_noop(&deque, 3); // head=3
        deque.request_growth();
        push_noop(&deque, 4); // head=4, private = head-split = 3 > 1: grows
        let (_, split) = deque.published_snapshot();
        assert!(split > 1, "split should have moved right to grow shared region");
    }
}
