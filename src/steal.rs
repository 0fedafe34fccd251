//! The steal protocol (C3): victim selection and the claim/run/complete
//! sequence a thief runs against another worker's deque.
//!
//! This module only knows about the geometry primitives [`crate::deque`]
//! exposes; it owns the policy (who to pick, how hard to retry) and the
//! handshake with [`crate::task::TaskSlot`] that turns a claimed slot into a
//! completed one.

use crate::deque::{ClaimOutcome, Deque};
use crate::task::Thief;
use std::sync::atomic::Ordering;

/// How a steal attempt against one victim went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealOutcome {
    /// Ran a stolen task to completion.
    Stole,
    /// The victim had nothing shared; its owner has been asked to grow its
    /// shared region for next time.
    Empty,
    /// Lost a race for the one task that was there; worth retrying.
    Busy,
}

/// Picks victims and drives the claim/run/complete handshake for a single
/// stealing attempt, holding the thief's own worker id and a per-worker RNG.
pub struct Stealer {
    worker_id: usize,
    rng: fastrand::Rng,
}

impl Stealer {
    pub fn new(worker_id: usize, seed: u64) -> Self {
        Stealer {
            worker_id,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Try once against a uniformly random victim other than ourselves.
    /// `deques` is indexed by worker id; `deques[self.worker_id]` is skipped.
    pub fn try_steal_once(&mut self, deques: &[Deque]) -> StealOutcome {
        if deques.len() <= 1 {
            return StealOutcome::Empty;
        }
        let victim_id = self.pick_victim(deques.len());
        self.try_steal_from(&deques[victim_id])
    }

    fn pick_victim(&mut self, n_workers: usize) -> usize {
        // Sample uniformly from the other n_workers - 1 workers without a
        // rejection loop: draw from [0, n-1) and shift past ourselves.
        let offset = self.rng.usize(0..n_workers - 1);
        if offset < self.worker_id {
            offset
        } else {
            offset + 1
        }
    }

    /// Attempt to claim and run one task from `victim`.
    pub fn try_steal_from(&self, victim: &Deque) -> StealOutcome {
        match victim.claim() {
            ClaimOutcome::Empty => {
                victim.request_growth();
                StealOutcome::Empty
            }
            ClaimOutcome::Busy => StealOutcome::Busy,
            ClaimOutcome::Claimed(idx) => {
                let slot = victim.slot(idx);
                if !slot.thief().try_claim(self.worker_id, Ordering::AcqRel, Ordering::Acquire) {
                    // Another thief (or the owner's own shrink-reclaim) beat
                    // us to this slot's thief handle after we won the tail
                    // CAS; the slot index is still burnt, but there is
                    // nothing left here for us to run.
                    return StealOutcome::Busy;
                }
                // Safety: the CAS above gives this worker exclusive access
                // to the slot's body until it writes `Completed`.
                unsafe {
                    slot.run();
                }
                StealOutcome::Stole
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deque::Deque;

    #[test]
    fn steals_a_pushed_task() {
        let victim = Deque::new(8);
        victim
            .push(|slot| unsafe { slot.install(20i64, |n: i64| n * 2) })
            .unwrap();

        let mut thief = Stealer::new(1, 42);
        let outcome = thief.try_steal_from(&victim);
        assert_eq!(outcome, StealOutcome::Stole);

        let (tail, _) = victim.published_snapshot();
        assert_eq!(tail, 1);
    }

    #[test]
    fn empty_victim_requests_growth() {
        let victim = Deque::new(8);
        let thief = Stealer::new(1, 7);
        assert_eq!(thief.try_steal_from(&victim), StealOutcome::Empty);
        // request_growth is idempotent and observable even with nothing private.
        victim.request_growth();
    }

    #[test]
    fn claimed_slot_ends_completed() {
        let victim = Deque::new(8);
        victim
            .push(|slot| unsafe { slot.install(3i64, |n: i64| n + 1) })
            .unwrap();
        let thief = Stealer::new(2, 9);
        thief.try_steal_from(&victim);
        let slot = victim.slot(0);
        assert_eq!(slot.thief().load(Ordering::Acquire), Thief::Completed);
        let result: i64 = unsafe { slot.take_result() };
        assert_eq!(result, 4);
    }

    #[test]
    fn victim_selection_skips_self() {
        let mut stealer = Stealer::new(2, 123);
        for _ in 0..50 {
            let victim = stealer.pick_victim(4);
            assert_ne!(victim, 2);
            assert!(victim < 4);
        }
    }
}
