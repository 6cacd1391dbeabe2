//! A manually lock/unlock-able spinlock.
//!
//! Every cache level's lock must stay held from `find_and_lock` across the
//! parent's `access` call through to `unlock`/`insert_and_unlock` — three
//! separate trait-method calls, not one lexical scope. A `std::sync::Mutex`
//! guard cannot be threaded through a `dyn CacheLevel` call boundary that
//! way, so this type ports `original_source/include/util.h`'s `Spinlock`
//! (an `atomic_flag` test-and-set) directly: `lock`/`unlock` are ordinary
//! methods, not an RAII guard.
use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `get_mut`, which
// requires the caller to be holding the lock; `lock`/`unlock` establish the
// same acquire/release pairing a `Mutex` would.
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub(crate) fn new(data: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Spins until the lock is acquired.
    pub(crate) fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }
    }

    /// Releases the lock. Callers must have previously called `lock` and not
    /// yet called `unlock` again.
    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Borrows the protected data.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the lock (via `lock`) and must not let
    /// the returned reference outlive the locked section.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }
}
