//! The task descriptor (C1): a fixed-size, cache-aligned record holding a
//! type-erased trampoline, a thief handle, and the argument/result bytes.
//!
//! There is no per-arity code generation here. A single generic `TaskSlot`
//! stores a monomorphized trampoline function pointer selected at spawn
//! time; the argument and result types just need to fit the fixed
//! footprint, checked by a `const` assertion at the call site.

use std::cell::{Cell, UnsafeCell};
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use static_assertions::const_assert;

/// Maximum combined size, in bytes, of a task's argument tuple or its
/// result. Bump this to grow what a task can carry; every `spawn` site
/// re-checks its own types against it at compile time.
pub const MAX_TASK_FOOTPRINT: usize = 48;

const STATE_EMPTY: usize = 0;
const STATE_TASK: usize = 1;
const STATE_COMPLETED: usize = 2;
const STATE_WORKER_BASE: usize = 3;

/// The logical value of a task's `thief` handle (§3, invariant 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thief {
    /// Never spawned, or cleared after a sync/drop.
    Empty,
    /// Spawned, not yet claimed by a thief.
    Task,
    /// Claimed by the named worker; it is executing (or about to).
    Claimed(usize),
    /// The claiming thief has written the result.
    Completed,
}

impl Thief {
    fn from_raw(raw: usize) -> Self {
        match raw {
            STATE_EMPTY => Thief::Empty,
            STATE_TASK => Thief::Task,
            STATE_COMPLETED => Thief::Completed,
            n => Thief::Claimed(n - STATE_WORKER_BASE),
        }
    }

    fn into_raw(self) -> usize {
        match self {
            Thief::Empty => STATE_EMPTY,
            Thief::Task => STATE_TASK,
            Thief::Completed => STATE_COMPLETED,
            Thief::Claimed(worker) => worker + STATE_WORKER_BASE,
        }
    }
}

/// The atomic `thief` field. Transitions only follow the grammar in §3.6:
/// `Empty -> Task -> Claimed(w) -> Completed`, or `Task -> Empty`.
#[derive(Debug)]
pub struct ThiefCell(AtomicUsize);

impl ThiefCell {
    pub const fn new() -> Self {
        ThiefCell(AtomicUsize::new(STATE_EMPTY))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> Thief {
        Thief::from_raw(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, value: Thief, order: Ordering) {
        self.0.store(value.into_raw(), order);
    }

    /// CAS the handle from `Task` to `Claimed(worker)`. This is the one
    /// operation a thief and the owner can race on; exactly one wins.
    #[inline]
    pub fn try_claim(&self, worker: usize, success: Ordering, failure: Ordering) -> bool {
        self.0
            .compare_exchange(STATE_TASK, worker + STATE_WORKER_BASE, success, failure)
            .is_ok()
    }
}

impl Default for ThiefCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased pointer to the user body, reinterpreted back to `fn(A) -> R`
/// by the monomorphized trampoline chosen at spawn time.
type RawBody = *const ();
type Trampoline = unsafe fn(*mut u8, RawBody);

/// One slot in a worker's deque: the `thief` handle, the selected
/// trampoline, the type-erased body pointer, and the argument/result bytes.
///
/// `storage` plays the role of the C union in the distilled spec: the
/// argument bytes written by `spawn` are overwritten in place by the result
/// bytes written by the trampoline, so the footprint is `max(size_of::<A>(),
/// size_of::<R>())`, not their sum.
#[repr(C, align(64))]
pub struct TaskSlot {
    thief: ThiefCell,
    trampoline: Cell<Option<Trampoline>>,
    body: Cell<RawBody>,
    storage: UnsafeCell<MaybeUninit<[u8; MAX_TASK_FOOTPRINT]>>,
}

const_assert!(mem::size_of::<TaskSlot>() <= 128);

impl TaskSlot {
    pub const fn new() -> Self {
        TaskSlot {
            thief: ThiefCell::new(),
            trampoline: Cell::new(None),
            body: Cell::new(ptr::null()),
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub fn thief(&self) -> &ThiefCell {
        &self.thief
    }

    /// Write `args` and the monomorphized trampoline for `f` into this slot
    /// and publish `thief = Task`. Must only be called by the owner, and
    /// only once the owner has observed the slot as `Empty`.
    ///
    /// # Safety
    /// The caller must guarantee that no thief can observe this slot (i.e.
    /// it is still outside the published shared region) until after this
    /// call's `store` below.
    pub unsafe fn install<A, R>(&self, args: A, f: fn(A) -> R) {
        const {
            assert!(
                mem::size_of::<A>() <= MAX_TASK_FOOTPRINT,
                "task argument tuple exceeds MAX_TASK_FOOTPRINT"
            );
            assert!(
                mem::size_of::<R>() <= MAX_TASK_FOOTPRINT,
                "task result exceeds MAX_TASK_FOOTPRINT"
            );
        }

        unsafe {
            let slot = self.storage.get().cast::<A>();
            slot.write(args);
        }
        self.body.set(f as *const ());
        self.trampoline.set(Some(trampoline::<A, R>));
        // Release: publishes the args/trampoline writes above to whichever
        // thief next observes `Task` via an acquire load.
        self.thief.store(Thief::Task, Ordering::Release);
    }

    /// Run the installed trampoline, writing the result back into `storage`
    /// and transitioning `thief` to `Completed` with release ordering.
    ///
    /// # Safety
    /// Caller must hold exclusive (claimed or owning) access to the slot.
    pub unsafe fn run(&self) {
        let trampoline = self.trampoline.get().expect("run() on unpopulated slot");
        unsafe {
            trampoline(self.storage.get().cast::<u8>(), self.body.get());
        }
        self.thief.store(Thief::Completed, Ordering::Release);
    }

    /// Reclaim the still-private arguments without running the body
    /// (the `sync`/`drop` fast path stealing its own task back, §4.5 case 1).
    ///
    /// # Safety
    /// Caller must observe `thief == Task` immediately before calling this,
    /// with no thief able to claim the slot concurrently.
    pub unsafe fn take_args<A>(&self) -> A {
        unsafe { self.storage.get().cast::<A>().read() }
    }

    /// Copy the result out after observing `thief == Completed`.
    ///
    /// # Safety
    /// Caller must have observed `Completed` with acquire ordering first.
    pub unsafe fn take_result<R>(&self) -> R {
        unsafe { self.storage.get().cast::<R>().read() }
    }

    /// Reset to the never-spawned state, ready for reuse.
    pub fn clear(&self) {
        self.trampoline.set(None);
        self.body.set(ptr::null());
        self.thief.store(Thief::Empty, Ordering::Relaxed);
    }
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: a `TaskSlot` is only ever read/written by its owner or by the
// single worker that has won the CAS claiming it (§3 invariant 7); the
// `ThiefCell` handshake is the synchronization that makes that true.
unsafe impl Sync for TaskSlot {}

unsafe fn trampoline<A, R>(storage: *mut u8, body: RawBody) {
    unsafe {
        let args = storage.cast::<A>().read();
        let f: fn(A) -> R = mem::transmute(body);
        let result = f(args);
        storage.cast::<R>().write(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_run_take_result() {
        let slot = TaskSlot::new();
        unsafe {
            slot.install(21i64, |n: i64| n * 2);
            assert_eq!(slot.thief().load(Ordering::Acquire), Thief::Task);
            slot.run();
            assert_eq!(slot.thief().load(Ordering::Acquire), Thief::Completed);
            let result: i64 = slot.take_result();
            assert_eq!(result, 42);
        }
    }

    #[test]
    fn reclaim_without_running() {
        let slot = TaskSlot::new();
        unsafe {
            slot.install((3i32, 4i32), |(a, b): (i32, i32)| a + b);
            let args: (i32, i32) = slot.take_args();
            assert_eq!(args, (3, 4));
        }
    }

    #[test]
    fn claim_cas_is_exclusive() {
        let slot = TaskSlot::new();
        unsafe {
            slot.install(1i64, |n: i64| n);
        }
        assert!(slot.thief().try_claim(5, Ordering::AcqRel, Ordering::Relaxed));
        assert_eq!(slot.thief().load(Ordering::Acquire), Thief::Claimed(5));
        // A second claim attempt must fail: the state is no longer `Task`.
        assert!(!slot.thief().try_claim(6, Ordering::AcqRel, Ordering::Relaxed));
    }

    #[test]
    fn footprint_bound_holds() {
        assert!(mem::size_of::<[u8; MAX_TASK_FOOTPRINT]>() >= mem::size_of::<(i64, i64, i64)>());
    }
}
