//! All-active-workers rendezvous (C6), built the way the teacher builds its
//! blocking handoffs: a `parking_lot` mutex plus condvar, off the hot path.
//!
//! Reusable via a generation counter so the same barrier instance can be
//! waited on repeatedly (suspend/resume, and the entry/exit pair around
//! every frame switch in [`crate::frame`]).

use parking_lot::{Condvar, Mutex};

struct State {
    remaining: usize,
    generation: u64,
}

pub struct Barrier {
    parties: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        Barrier {
            parties,
            state: Mutex::new(State {
                remaining: parties,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until `parties` callers have all called `wait()`. The last
    /// arriver resets the counter and wakes everyone else; all writes made
    /// by any arriver before its call happen-before every arriver's return,
    /// via the mutex acquired on both sides.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.remaining -= 1;
        if state.remaining == 0 {
            state.remaining = self.parties;
            state.generation = state.generation.wrapping_add(1);
            self.condvar.notify_all();
        } else {
            while state.generation == generation {
                self.condvar.wait(&mut state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn all_parties_release_together() {
        let barrier = Arc::new(Barrier::new(4));
        let passed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let passed = Arc::clone(&passed);
                thread::spawn(move || {
                    barrier.wait();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn barrier_is_reusable() {
        let barrier = Arc::new(Barrier::new(2));
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            let other = thread::spawn(move || barrier.wait());
            barrier.wait();
            other.join().unwrap();
        }
    }
}
