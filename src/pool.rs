//! Pool configuration and lifecycle (C4): `PoolConfig`, `Pool::start`, and
//! the shared state every worker thread borrows via an `Arc`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::counters::Counters;
use crate::deque::Deque;
use crate::error::{Result, SchedulerError};
use crate::frame::FrameSlot;
use crate::handle::TaskHandle;
use crate::steal::Stealer;
use crate::worker;

/// Default per-worker deque capacity when [`PoolConfig::dqsize`] is left at
/// `0` (§4.10, §6: "e.g. 100k slots").
const DEFAULT_DQSIZE: usize = 100_000;

/// Configuration for [`Pool::start`] (A3).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of worker threads. `0` autodetects via
    /// [`std::thread::available_parallelism`].
    pub n_workers: usize,
    /// Per-worker deque capacity. `0` resolves to a sensible default.
    pub dqsize: usize,
    /// Whether to pin each worker to a distinct processing unit.
    pub pin: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            n_workers: 0,
            dqsize: 0,
            pin: false,
        }
    }
}

impl PoolConfig {
    fn resolved(self) -> (usize, usize) {
        let n_workers = if self.n_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.n_workers
        };
        let dqsize = if self.dqsize == 0 {
            DEFAULT_DQSIZE
        } else {
            self.dqsize
        };
        (n_workers, dqsize)
    }
}

/// State shared, by `Arc`, between the `Pool` handle and every worker
/// thread. Workers touch only their own slot in `deques`/`counters`/
/// `stealers` — the rest of the fields are genuinely cross-thread.
pub(crate) struct PoolShared {
    deques: Vec<Deque>,
    counters: Vec<Counters>,
    stealers: Vec<RefCell<Stealer>>,
    affinity: Vec<Option<usize>>,
    frame: FrameSlot,
    stop: AtomicBool,
    suspend_gate: Mutex<bool>,
    suspend_condvar: Condvar,
}

// Safety: `stealers[i]` (a `RefCell`) is only ever borrowed by worker `i`'s
// own thread (`crate::worker::run` and the leap-steal path reached only
// from inside worker `i`'s call stack); every other field is either atomic
// or immutable after construction.
unsafe impl Sync for PoolShared {}

impl PoolShared {
    pub fn deque(&self, id: usize) -> &Deque {
        &self.deques[id]
    }

    pub fn counters(&self, id: usize) -> &Counters {
        &self.counters[id]
    }

    pub fn stealer(&self, id: usize) -> &RefCell<Stealer> {
        &self.stealers[id]
    }

    pub fn all_deques(&self) -> &[Deque] {
        &self.deques
    }

    pub fn frame(&self) -> &FrameSlot {
        &self.frame
    }

    pub fn stop_requested(&self) -> &AtomicBool {
        &self.stop
    }

    pub fn affinity_of(&self, id: usize) -> Option<usize> {
        self.affinity[id]
    }

    pub fn worker_count(&self) -> usize {
        self.deques.len()
    }

    /// Park the calling worker while the pool is suspended (§4.4/§4.6).
    pub fn park_if_suspended(&self, _id: usize) {
        let mut suspended = self.suspend_gate.lock();
        while *suspended {
            self.suspend_condvar.wait(&mut suspended);
        }
    }
}

/// A running pool of worker threads (C4).
///
/// The thread that calls [`Pool::start`] is *not* itself a worker; it
/// becomes worker 0 only transiently, for the duration of a `run()` call.
pub struct Pool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Start a pool with the given configuration. Spawns `n_workers - 1` OS
    /// threads (the caller's own thread stands in for worker 0 only when it
    /// calls [`Pool::run`]); all `n_workers` deques are allocated up front.
    pub fn start(config: PoolConfig) -> Result<Pool> {
        let (n_workers, dqsize) = config.resolved();
        info!(n_workers, dqsize, "starting pool");

        let deques = (0..n_workers).map(|_| Deque::new(dqsize)).collect();
        let counters = (0..n_workers).map(|_| Counters::default()).collect();
        let stealers = (0..n_workers)
            .map(|id| RefCell::new(Stealer::new(id, seed_for(id))))
            .collect();
        let affinity = vec![None; n_workers];

        let shared = Arc::new(PoolShared {
            deques,
            counters,
            stealers,
            affinity,
            frame: FrameSlot::new(n_workers),
            stop: AtomicBool::new(false),
            suspend_gate: Mutex::new(false),
            suspend_condvar: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(n_workers.saturating_sub(1));
        for id in 1..n_workers {
            let shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("forkjoin-worker-{id}"))
                .spawn(move || worker::run(shared, id))
                .map_err(SchedulerError::ThreadSpawn)?;
            handles.push(spawned);
        }

        if config.pin {
            // Affinity placement is an external collaborator per §1; this
            // crate records the intent but does not implement PU pinning.
            info!("affinity requested but pinning is not implemented by this crate");
        }

        Ok(Pool { shared, handles })
    }

    /// Convenience wrapper matching the historical two-argument `start`.
    pub fn start_with(n_workers: usize, dqsize: usize) -> Result<Pool> {
        Pool::start(PoolConfig {
            n_workers,
            dqsize,
            pin: false,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count()
    }

    /// Inject a task from outside any worker and block for its result. If
    /// called from inside a worker, degrades to a direct call (§6).
    pub fn run<A, R>(&self, args: A, f: fn(A) -> R) -> R {
        if worker::is_worker() {
            return f(args);
        }
        worker::with_worker_context(&self.shared, 0, || {
            let handle: TaskHandle<A, R> =
                crate::join::spawn(self.shared.deque(0), 0, self.shared.counters(0), args, f);
            crate::join::sync(self.shared.deque(0), 0, self.shared.counters(0), handle, || {
                let mut stealer = self.shared.stealer(0).borrow_mut();
                matches!(
                    stealer.try_steal_once(self.shared.all_deques()),
                    crate::steal::StealOutcome::Stole
                )
            })
        })
    }

    /// Run `f` cooperatively across every worker, once, returning its result.
    /// Callable from inside or outside a worker (§6); an outside caller
    /// stands in as worker 0 for the span of the call, same as `run()`.
    pub fn new_frame<A, R>(&self, args: A, f: fn(A) -> R) -> R {
        if worker::is_worker() {
            let id = worker::worker_id();
            self.shared
                .frame()
                .new_frame(args, f, || worker::serve_new_frame(&self.shared, id))
        } else {
            worker::with_worker_context(&self.shared, 0, || {
                self.shared
                    .frame()
                    .new_frame(args, f, || worker::serve_new_frame(&self.shared, 0))
            })
        }
    }

    /// Run `f` independently on every worker; no result aggregation.
    pub fn together(&self, f: &(dyn Fn(usize) + Sync)) {
        if worker::is_worker() {
            self.shared.frame().together(f);
        } else {
            worker::with_worker_context(&self.shared, 0, || self.shared.frame().together(f));
        }
    }

    /// Cooperatively park every worker until [`Pool::resume`] is called.
    /// Must be called from outside any worker.
    pub fn suspend(&self) {
        *self.shared.suspend_gate.lock() = true;
    }

    /// Wake workers parked by [`Pool::suspend`].
    pub fn resume(&self) {
        *self.shared.suspend_gate.lock() = false;
        self.shared.suspend_condvar.notify_all();
    }

    /// Signal termination and join every worker thread.
    pub fn stop(mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.resume(); // wake any parked worker so it can observe `stop`
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn seed_for(worker_id: usize) -> u64 {
    // A per-worker LCG seed derived from the worker id (§4.4): distinct,
    // deterministic, and cheap to compute at startup.
    (worker_id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
