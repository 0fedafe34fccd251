//! # forkjoin — a work-stealing fork/join scheduler
//!
//! Client code expresses a computation as a dynamic tree of short tasks;
//! `forkjoin` spreads them across a fixed pool of worker threads using
//! randomized work stealing. Spawning a task is nearly as cheap as a
//! function call when no thief is around to contend for it.
//!
//! ## Example
//!
//! ```rust
//! use forkjoin::{Pool, PoolConfig};
//!
//! fn fib(n: u64) -> u64 {
//!     if n < 2 {
//!         return n;
//!     }
//!     let left = forkjoin::spawn(n - 1, fib);
//!     let right = fib(n - 2);
//!     forkjoin::sync(left) + right
//! }
//!
//! let pool = Pool::start(PoolConfig {
//!     n_workers: 4,
//!     ..Default::default()
//! }).unwrap();
//! assert_eq!(pool.run(10u64, fib), 55);
//! pool.stop();
//! ```
//!
//! ## Layout
//!
//! - [`task`] — the fixed-size task descriptor (C1).
//! - [`deque`] — the per-worker split deque (C2).
//! - [`steal`] — victim selection and the claim/run/complete handshake (C3).
//! - [`worker`] / [`pool`] — the worker loop and pool lifecycle (C4).
//! - [`join`] — `sync`/`drop` semantics (C5).
//! - [`barrier`] — the all-workers rendezvous (C6).
//! - [`frame`] — `new_frame`/`together` (C7).
//! - [`counters`] — the optional, feature-gated instrumentation (A2).

mod barrier;
mod counters;
mod deque;
mod error;
mod frame;
mod handle;
mod join;
mod pool;
mod steal;
mod task;
mod worker;

pub use error::{Result, SchedulerError};
pub use handle::TaskHandle;
pub use pool::{Pool, PoolConfig};
pub use task::MAX_TASK_FOOTPRINT;
pub use worker::{check_yield, drop_task, is_worker, spawn, sync, worker_id, worker_pu};

/// Start a pool with `n_workers` workers and `dqsize`-slot deques. A thin
/// convenience wrapper around [`Pool::start`] matching the historical
/// two-argument form (§4.10).
pub fn start(n_workers: usize, dqsize: usize) -> Result<Pool> {
    Pool::start_with(n_workers, dqsize)
}
