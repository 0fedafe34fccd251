//! The handle returned by `spawn` (§4.5, §9 "alloca-backed argument
//! passing"). It names a specific deque slot on a specific worker so a later
//! `sync`/`drop` can find it again.
//!
//! The contract, enforced at `sync`/`drop` time rather than by the type
//! system, is that a handle is consumed on the same worker that created it,
//! in strict LIFO order with its sibling spawns.

use std::marker::PhantomData;

/// Names the slot a `spawn()` call installed its task into.
pub struct TaskHandle<A, R> {
    pub(crate) slot_index: usize,
    pub(crate) worker_id: usize,
    // Invariant, not actually stored: no task ever outlives the `A`/`R`
    // types it was built with, so the handle is bound to both.
    _marker: PhantomData<(fn() -> A, fn() -> R)>,
}

impl<A, R> TaskHandle<A, R> {
    pub(crate) fn new(slot_index: usize, worker_id: usize) -> Self {
        TaskHandle {
            slot_index,
            worker_id,
            _marker: PhantomData,
        }
    }
}

impl<A, R> std::fmt::Debug for TaskHandle<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("worker_id", &self.worker_id)
            .field("slot_index", &self.slot_index)
            .finish()
    }
}
