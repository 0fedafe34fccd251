//! New-frame and together (C7): a single pool-wide slot that temporarily
//! diverts every worker's steal loop onto one posted task, either run
//! cooperatively once (new frame) or independently by every worker
//! (together).
//!
//! Posts serialize through `post_lock`; the `pending` flag is the one
//! cross-thread gate workers poll from their steal loop, the same
//! publish/acquire shape as a task slot's `thief` handle.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::barrier::Barrier;
use crate::task::{TaskSlot, Thief};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    NewFrame,
    Together,
}

type TogetherBody<'a> = &'a (dyn Fn(usize) + Sync);

/// Pool-wide coordination for `new_frame`/`together`. Owned by [`crate::pool::Pool`]
/// and shared (by reference) with every worker.
pub struct FrameSlot {
    pending: AtomicBool,
    mode: Cell<Mode>,
    task: TaskSlot,
    together_body: Cell<Option<*const (dyn Fn(usize) + Sync)>>,
    post_lock: Mutex<()>,
    entry: Barrier,
    exit: Barrier,
    n_workers: usize,
}

// Safety: `mode` and `together_body` are only written by the single thread
// holding `post_lock` before `pending` is published with release ordering,
// and only read by workers after observing `pending` with acquire ordering.
unsafe impl Sync for FrameSlot {}

impl FrameSlot {
    pub fn new(n_workers: usize) -> Self {
        FrameSlot {
            pending: AtomicBool::new(false),
            mode: Cell::new(Mode::Together),
            task: TaskSlot::new(),
            together_body: Cell::new(None),
            post_lock: Mutex::new(()),
            entry: Barrier::new(n_workers),
            exit: Barrier::new(n_workers),
            n_workers,
        }
    }

    /// `true` if a frame switch is in flight; workers check this at steal-loop
    /// re-entry points and in `check_yield`.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Run `f(args)` cooperatively: exactly one worker executes the body,
    /// the rest serve it as thieves against its deque until it's done, and
    /// every worker observes the post-frame state on return. `serve` should
    /// attempt one steal against the elected worker's deque and report
    /// whether it made progress; it is only ever called by participants
    /// that lost the claim race. Blocks the calling thread (worker or
    /// external) until the frame completes.
    pub fn new_frame<A, R>(&self, args: A, f: fn(A) -> R, mut serve: impl FnMut() -> bool) -> R {
        let _guard = self.post_lock.lock();
        unsafe {
            self.task.install(args, f);
        }
        self.mode.set(Mode::NewFrame);
        self.pending.store(true, Ordering::Release);

        self.entry.wait();
        self.run_new_frame_slot_as(current_worker_hint(), &mut serve);
        self.exit.wait();

        // Safety: every participant has passed the exit barrier, so the
        // task is `Completed` and no one else is still reading it.
        let result = unsafe { self.task.take_result() };
        self.task.clear();
        self.pending.store(false, Ordering::Release);
        result
    }

    /// Run `f(worker_id)` independently on every worker; no result
    /// aggregation. Blocks until all instances have completed.
    pub fn together(&self, f: &(dyn Fn(usize) + Sync)) {
        let _guard = self.post_lock.lock();
        self.together_body.set(Some(f as *const _));
        self.mode.set(Mode::Together);
        self.pending.store(true, Ordering::Release);

        self.entry.wait();
        self.run_together_slot();
        self.exit.wait();

        self.together_body.set(None);
        self.pending.store(false, Ordering::Release);
    }

    /// Called by every worker (including the poster, if it is one) after
    /// observing `pending` and passing the entry barrier. `serve` is used
    /// only in `NewFrame` mode, by whichever participants don't win the
    /// claim race (§4.7: "one worker runs the body while the others act as
    /// thieves serving it").
    pub fn participate(&self, worker_id: usize, mut serve: impl FnMut() -> bool) {
        match self.mode.get() {
            Mode::NewFrame => self.run_new_frame_slot_as(worker_id, &mut serve),
            Mode::Together => self.run_together_slot(),
        }
    }

    /// The worker id that won the claim race for the current (or most
    /// recently completed) new-frame task, once it has been decided.
    pub fn winner(&self) -> Option<usize> {
        match self.task.thief().load(Ordering::Acquire) {
            Thief::Claimed(worker) => Some(worker),
            _ => None,
        }
    }

    /// Rendezvous entered by every worker once it observes a pending frame.
    pub fn entry_wait(&self) {
        self.entry.wait();
    }

    /// Rendezvous that ends the frame; symmetric with [`FrameSlot::entry_wait`].
    pub fn exit_wait(&self) {
        self.exit.wait();
    }

    /// The loser's branch calls `serve` instead of spinning bare, so it
    /// steals sub-tasks the winner spawns onto its own deque rather than
    /// idling (§4.7: "the others act as thieves serving it").
    fn run_new_frame_slot_as(&self, worker_id: usize, serve: &mut dyn FnMut() -> bool) {
        if self
            .task
            .thief()
            .try_claim(worker_id, Ordering::AcqRel, Ordering::Acquire)
        {
            // Safety: the CAS above gives this worker exclusive access.
            unsafe {
                self.task.run();
            }
        } else {
            while self.task.thief().load(Ordering::Acquire) != Thief::Completed {
                if !serve() {
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn run_together_slot(&self) {
        if let Some(body) = self.together_body.get() {
            // Safety: the closure reference outlives the entry/exit barrier
            // pair it was posted within (enforced by `new_frame`/`together`
            // blocking their caller for exactly that span).
            let body: TogetherBody<'_> = unsafe { &*body };
            body(current_worker_hint());
        }
    }
}

// `together`'s body needs to know which worker is calling it; the real id
// comes from `crate::pool::worker_id()`. This indirection exists only so
// `frame.rs` doesn't need to depend on `crate::pool` for a single usize.
thread_local! {
    static WORKER_ID_HINT: Cell<usize> = const { Cell::new(usize::MAX) };
}

pub fn set_worker_id_hint(id: usize) {
    WORKER_ID_HINT.with(|cell| cell.set(id));
}

fn current_worker_hint() -> usize {
    WORKER_ID_HINT.with(|cell| cell.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn new_frame_runs_once_and_returns_result() {
        let frame = Arc::new(FrameSlot::new(3));
        let handles: Vec<_> = (0..3)
            .map(|id| {
                let frame = Arc::clone(&frame);
                thread::spawn(move || {
                    set_worker_id_hint(id);
                    if id == 0 {
                        Some(frame.new_frame(6i64, |n| n * 7, || false))
                    } else {
                        frame.entry.wait();
                        frame.participate(id, || false);
                        frame.exit.wait();
                        None
                    }
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().flatten().copied().collect::<Vec<_>>(), vec![42]);
    }

    #[test]
    fn together_runs_on_every_worker() {
        let frame = Arc::new(FrameSlot::new(3));
        let recorded = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|id| {
                let frame = Arc::clone(&frame);
                let recorded = Arc::clone(&recorded);
                thread::spawn(move || {
                    set_worker_id_hint(id);
                    let mark = move |_worker_id: usize| {
                        recorded.fetch_add(1, Ordering::SeqCst);
                    };
                    if id == 0 {
                        frame.together(&mark);
                    } else {
                        frame.entry.wait();
                        frame.participate(id, || false);
                        frame.exit.wait();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorded.load(Ordering::SeqCst), 3);
    }
}
