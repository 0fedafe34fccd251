//! The worker loop (C4): each worker thread runs a steal-until-work cycle
//! against its own deque and every other worker's, polling for pending
//! frame switches at loop re-entry (§4.4).
//!
//! Also hosts the thread-local plumbing that lets the free functions
//! `spawn`/`sync`/`drop_task`/`check_yield`/`current_worker`/... find "this
//! worker" without an explicit handle threaded through user task bodies —
//! the same implicit-per-thread-resource pattern the distilled spec calls
//! for in its "thread-local worker pointer" design note.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::frame;
use crate::handle::TaskHandle;
use crate::join;
use crate::pool::PoolShared;
use crate::steal::{StealOutcome, Stealer};

thread_local! {
    static CURRENT: Cell<Option<*const PoolShared>> = const { Cell::new(None) };
    static CURRENT_ID: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Install this thread as `worker_id` against `shared` for the duration of
/// `body`. Used both by worker threads (for their whole lifetime) and by the
/// external `run()` shim (for the span of a single injected task).
pub(crate) fn with_worker_context<F, R>(shared: &Arc<PoolShared>, worker_id: usize, body: F) -> R
where
    F: FnOnce() -> R,
{
    let prev = CURRENT.with(|c| c.replace(Some(Arc::as_ptr(shared))));
    let prev_id = CURRENT_ID.with(|c| c.replace(worker_id));
    frame::set_worker_id_hint(worker_id);
    let result = body();
    CURRENT.with(|c| c.set(prev));
    CURRENT_ID.with(|c| c.set(prev_id));
    result
}

fn with_current<R>(f: impl FnOnce(&PoolShared, usize) -> R) -> R {
    let ptr = CURRENT.with(|c| c.get());
    let id = CURRENT_ID.with(|c| c.get());
    match ptr {
        // Safety: the pointer was derived from an `Arc<PoolShared>` kept
        // alive for the scope installed by `with_worker_context`, which is
        // still on this thread's call stack whenever `CURRENT` is set.
        Some(ptr) => f(unsafe { &*ptr }, id),
        None => panic!("forkjoin: called from outside any worker"),
    }
}

/// `true` if the calling thread is currently running inside a worker.
pub fn is_worker() -> bool {
    CURRENT.with(|c| c.get().is_some())
}

/// This worker's id, in `[0, worker_count())`.
///
/// # Panics
/// Panics if called outside a worker.
pub fn worker_id() -> usize {
    with_current(|_, id| id)
}

/// The processing unit this worker is pinned to, if affinity was requested
/// and succeeded.
pub fn worker_pu() -> Option<usize> {
    with_current(|shared, id| shared.affinity_of(id))
}

/// Publish a task onto the calling worker's deque.
///
/// # Panics
/// Panics outside a worker, or with [`crate::SchedulerError::TaskStackOverflow`]
/// if the deque is full.
pub fn spawn<A, R>(args: A, f: fn(A) -> R) -> TaskHandle<A, R> {
    with_current(|shared, id| {
        let deque = shared.deque(id);
        let counters = shared.counters(id);
        trace!(worker = id, "spawn");
        join::spawn(deque, id, counters, args, f)
    })
}

/// Join the most recent un-joined `spawn()` on the calling worker's deque.
pub fn sync<A, R>(handle: TaskHandle<A, R>) -> R {
    with_current(|shared, id| {
        let deque = shared.deque(id);
        let counters = shared.counters(id);
        join::sync(deque, id, counters, handle, || leap_steal(shared, id))
    })
}

/// Join and discard the result of a prior `spawn()`.
pub fn drop_task<A, R>(handle: TaskHandle<A, R>) {
    with_current(|shared, id| {
        let deque = shared.deque(id);
        let counters = shared.counters(id);
        join::drop_task(deque, id, counters, handle, || leap_steal(shared, id));
    })
}

/// Cooperatively participate in a pending frame switch, if one is posted.
/// Called at steal-loop re-entry points and available for user code to call
/// directly inside long-running loops.
pub fn check_yield() {
    with_current(|shared, id| {
        if shared.frame().is_pending() {
            participate_in_frame(shared, id);
        }
    });
}

fn participate_in_frame(shared: &PoolShared, id: usize) {
    debug!(worker = id, "frame enter");
    shared.frame().entry_wait();
    shared.frame().participate(id, || serve_new_frame(shared, id));
    shared.frame().exit_wait();
    debug!(worker = id, "frame exit");
}

/// One steal attempt against the new-frame winner's deque, used by every
/// other participant while it waits (§4.7). Returns whether it made progress.
pub(crate) fn serve_new_frame(shared: &PoolShared, id: usize) -> bool {
    match shared.frame().winner() {
        Some(winner) if winner != id => {
            let mut stealer = shared.stealer(id).borrow_mut();
            matches!(
                stealer.try_steal_from(shared.deque(winner)),
                StealOutcome::Stole
            )
        }
        _ => false,
    }
}

/// One steal attempt used while a `sync`/`drop` is waiting on a thief
/// ("leap" stealing, §4.5). Returns whether it made progress.
fn leap_steal(shared: &PoolShared, id: usize) -> bool {
    if shared.frame().is_pending() {
        participate_in_frame(shared, id);
        return true;
    }
    let mut stealer = shared.stealer(id).borrow_mut();
    let deques = shared.all_deques();
    matches!(stealer.try_steal_once(deques), StealOutcome::Stole)
}

/// Runs on each worker OS thread for the lifetime of the pool.
pub(crate) fn run(shared: Arc<PoolShared>, id: usize) {
    with_worker_context(&shared, id, || {
        let stealer_cell = shared.stealer(id);
        loop {
            if shared.stop_requested().load(Ordering::Acquire) {
                return;
            }
            if shared.frame().is_pending() {
                participate_in_frame(&shared, id);
                continue;
            }
            shared.park_if_suspended(id);

            shared.counters(id).record_steal_attempt();
            let outcome = {
                let mut stealer = stealer_cell.borrow_mut();
                let deques = shared.all_deques();
                stealer.try_steal_once(deques)
            };
            match outcome {
                StealOutcome::Stole => shared.counters(id).record_steal_success(),
                StealOutcome::Empty => {
                    shared.counters(id).record_steal_failure();
                    backoff(id);
                }
                StealOutcome::Busy => {
                    // Lost a race; retry immediately against a new victim.
                }
            }
        }
    });
}

/// Back off briefly between failed steal rounds. Any non-degenerate policy
/// that preserves progress is acceptable (§9 open question); this one
/// yields to the OS rather than busy-spinning a full core for nothing.
fn backoff(id: usize) {
    trace!(worker = id, "steal nowork, backing off");
    std::thread::yield_now();
}
