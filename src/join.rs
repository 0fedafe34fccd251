//! The sync/drop engine (C5): decides, for the innermost un-joined spawn on
//! the calling worker's own deque, whether to run it locally or wait for a
//! thief, per the decision tree in §4.5.
//!
//! This module knows nothing about victim selection; a caller waiting on a
//! stolen task is handed a `steal_while_waiting` closure to call instead of
//! spinning idle ("leap" stealing, §4.5 Abandonment/recovery) — that policy
//! belongs to [`crate::worker`].

use std::sync::atomic::Ordering;

use crate::counters::Counters;
use crate::deque::Deque;
use crate::error::SchedulerError;
use crate::handle::TaskHandle;
use crate::task::{TaskSlot, Thief};

/// Publish `args`/`f` onto the calling worker's deque head.
///
/// # Panics
/// Panics with [`SchedulerError::TaskStackOverflow`] if the deque is full
/// (§4.2: fatal, not recoverable).
pub fn spawn<A, R>(
    deque: &Deque,
    worker_id: usize,
    counters: &Counters,
    args: A,
    f: fn(A) -> R,
) -> TaskHandle<A, R> {
    let slot_index = deque.head();
    match deque.push(|slot| unsafe { slot.install(args, f) }) {
        Ok(grew) => {
            if grew {
                counters.record_split_grow();
            }
        }
        Err(overflow) => panic!(
            "{}",
            SchedulerError::TaskStackOverflow {
                worker: worker_id,
                capacity: overflow.capacity,
            }
        ),
    }
    counters.record_spawn();
    TaskHandle::new(slot_index, worker_id)
}

fn validate_and_decrement<A, R>(deque: &Deque, worker_id: usize, handle: &TaskHandle<A, R>) {
    if worker_id != handle.worker_id || deque.head() == 0 || handle.slot_index != deque.head() - 1
    {
        panic!("{}", SchedulerError::SyncWithoutSpawn);
    }
    deque.set_head(handle.slot_index);
    // `head` just moved down to (possibly) cover the whole shared region;
    // re-arm allstolen so the next push republishes instead of leaving
    // `published` stuck at its high-water mark (§4.2/§4.3).
    deque.note_possibly_empty();
}

/// `true` once the owner has established exclusive access to the slot
/// (either it was still private, or the owner won the shrink race against
/// any thief); `false` means a thief got there first and the caller must
/// wait for it.
fn reclaim_locally(deque: &Deque, counters: &Counters, idx: usize) -> bool {
    let (_, split) = deque.published_snapshot();
    if idx >= split {
        return true;
    }
    let reclaimed = deque.try_shrink_below(idx);
    if reclaimed {
        counters.record_split_shrink();
    }
    reclaimed
}

fn wait_for_thief(slot: &TaskSlot, mut steal_while_waiting: impl FnMut() -> bool) {
    while slot.thief().load(Ordering::Acquire) != Thief::Completed {
        if !steal_while_waiting() {
            std::hint::spin_loop();
        }
    }
}

/// Join the most recent un-joined `spawn()` on this worker's deque.
///
/// `steal_while_waiting` is invoked in a loop if the task has already been
/// claimed by a thief; it should attempt one steal elsewhere and return
/// whether it made progress.
pub fn sync<A, R>(
    deque: &Deque,
    worker_id: usize,
    counters: &Counters,
    handle: TaskHandle<A, R>,
    steal_while_waiting: impl FnMut() -> bool,
) -> R {
    validate_and_decrement(deque, worker_id, &handle);
    let slot = deque.slot(handle.slot_index);

    if reclaim_locally(deque, counters, handle.slot_index) {
        // Safety: reclaim_locally established exclusive access; the slot is
        // still at `Task` because nothing else can touch it from here.
        unsafe { slot.run() };
    } else {
        wait_for_thief(slot, steal_while_waiting);
    }

    // Safety: the slot is `Completed` on both branches above.
    let result = unsafe { slot.take_result() };
    slot.clear();
    result
}

/// Join and discard the result. If the task can still be reclaimed locally
/// its body never runs at all; otherwise this waits like `sync` but throws
/// the result away.
pub fn drop_task<A, R>(
    deque: &Deque,
    worker_id: usize,
    counters: &Counters,
    handle: TaskHandle<A, R>,
    steal_while_waiting: impl FnMut() -> bool,
) {
    validate_and_decrement(deque, worker_id, &handle);
    let slot = deque.slot(handle.slot_index);

    if reclaim_locally(deque, counters, handle.slot_index) {
        // Safety: same exclusivity argument as `sync`; we just don't run it.
        let _args: A = unsafe { slot.take_args() };
    } else {
        wait_for_thief(slot, steal_while_waiting);
        let _result: R = unsafe { slot.take_result() };
    }
    slot.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_reclaims_without_a_thief() {
        let deque = Deque::new(8);
        let counters = Counters::default();
        let handle = spawn(&deque, 0, &counters, 20i64, |n| n * 2);
        let result = sync(&deque, 0, &counters, handle, || false);
        assert_eq!(result, 40);
        assert_eq!(deque.head(), 0);
    }

    #[test]
    fn drop_discards_result_without_running_when_reclaimed() {
        use std::cell::Cell;
        thread_local! {
            static RAN: Cell<bool> = Cell::new(false);
        }
        fn mark(_: ()) -> i64 {
            RAN.with(|r| r.set(true));
            1
        }
        let deque = Deque::new(8);
        let counters = Counters::default();
        let handle = spawn(&deque, 0, &counters, (), mark);
        drop_task(&deque, 0, &counters, handle, || false);
        assert!(!RAN.with(|r| r.get()), "reclaimed drop must not run the body");
    }

    #[test]
    fn waits_for_a_stolen_task() {
        let deque = Deque::new(8);
        let counters = Counters::default();
        let handle = spawn(&deque, 0, &counters, 5i64, |n| n + 1);

        // Simulate a thief claiming and completing the task before sync runs:
        // go through the real tail CAS, not just the slot's thief handle.
        let slot = deque.slot(0);
        assert!(matches!(deque.claim(), crate::deque::ClaimOutcome::Claimed(0)));
        assert!(slot.thief().try_claim(1, Ordering::AcqRel, Ordering::Relaxed));
        unsafe { slot.run() };

        let result = sync(&deque, 0, &counters, handle, || false);
        assert_eq!(result, 6);
    }

    #[test]
    #[should_panic]
    fn sync_on_wrong_worker_panics() {
        let deque = Deque::new(8);
        let counters = Counters::default();
        let handle = spawn(&deque, 0, &counters, 1i64, |n| n);
        sync(&deque, 1, &counters, handle, || false);
    }
}
