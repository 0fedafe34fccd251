//! Error types for pool startup and fatal scheduler conditions.
//!
//! Contention inside the steal loop (a lost CAS, an empty victim) is never
//! surfaced as an `Err` — it is handled locally by retrying or backing off.
//! See the module docs on [`crate::pool`] for the severities this type
//! distinguishes.

use std::fmt;
use std::io;

/// Errors that can occur when starting or misusing a [`crate::Pool`].
#[derive(Debug)]
#[non_exhaustive]
pub enum SchedulerError {
    /// A worker's deque ran out of private slots (`head == capacity`).
    ///
    /// This is a fatal, unrecoverable condition: the program spawned more
    /// un-synced tasks on one worker than `dqsize` allows.
    TaskStackOverflow {
        /// The worker whose deque overflowed.
        worker: usize,
        /// The configured deque capacity.
        capacity: usize,
    },
    /// [`crate::Pool::start`] was called while a pool was already running.
    AlreadyRunning,
    /// `sync()`/`drop_task()` was called with no matching `spawn()` on the
    /// calling worker's deque.
    SyncWithoutSpawn,
    /// Spawning a worker OS thread failed.
    ThreadSpawn(io::Error),
    /// Pinning a worker to a processing unit failed.
    Affinity(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::TaskStackOverflow { worker, capacity } => write!(
                f,
                "task stack overflow on worker {worker}: deque capacity {capacity} exceeded"
            ),
            SchedulerError::AlreadyRunning => write!(f, "pool is already running"),
            SchedulerError::SyncWithoutSpawn => {
                write!(f, "sync() called with no matching spawn() on this worker")
            }
            SchedulerError::ThreadSpawn(e) => write!(f, "failed to spawn worker thread: {e}"),
            SchedulerError::Affinity(msg) => write!(f, "failed to set worker affinity: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type used by pool construction and other fallible, non-hot-path operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
