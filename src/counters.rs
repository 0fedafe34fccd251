//! The toggleable event-counter interface (A2). With the `counters` feature
//! disabled, [`Counters`] is a zero-sized type and every increment call
//! compiles to nothing: enabling instrumentation cannot change scheduling
//! behavior, only whether counters exist to observe it.

#[cfg(feature = "counters")]
use crossbeam_utils::CachePadded;
#[cfg(feature = "counters")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker counts of the transitions named in §4.9.
#[derive(Default)]
pub struct Counters {
    #[cfg(feature = "counters")]
    inner: CachePadded<Inner>,
}

#[cfg(feature = "counters")]
#[derive(Default)]
struct Inner {
    spawned: AtomicU64,
    steal_attempted: AtomicU64,
    steal_succeeded: AtomicU64,
    steal_failed: AtomicU64,
    split_grown: AtomicU64,
    split_shrunk: AtomicU64,
}

macro_rules! counter_methods {
    ($($field:ident => $incr:ident, $read:ident;)*) => {
        impl Counters {
            $(
                #[cfg(feature = "counters")]
                #[inline]
                pub fn $incr(&self) {
                    self.inner.$field.fetch_add(1, Ordering::Relaxed);
                }

                #[cfg(not(feature = "counters"))]
                #[inline(always)]
                pub fn $incr(&self) {}

                #[cfg(feature = "counters")]
                pub fn $read(&self) -> u64 {
                    self.inner.$field.load(Ordering::Relaxed)
                }

                #[cfg(not(feature = "counters"))]
                pub fn $read(&self) -> u64 {
                    0
                }
            )*
        }
    };
}

counter_methods! {
    spawned => record_spawn, spawned;
    steal_attempted => record_steal_attempt, steal_attempted;
    steal_succeeded => record_steal_success, steal_succeeded;
    steal_failed => record_steal_failure, steal_failed;
    split_grown => record_split_grow, split_grown;
    split_shrunk => record_split_shrink, split_shrunk;
}

#[cfg(all(test, feature = "counters"))]
mod tests {
    use super::*;

    #[test]
    fn increments_are_observable() {
        let counters = Counters::default();
        counters.record_spawn();
        counters.record_spawn();
        counters.record_steal_success();
        assert_eq!(counters.spawned(), 2);
        assert_eq!(counters.steal_succeeded(), 1);
        assert_eq!(counters.steal_failed(), 0);
    }
}
