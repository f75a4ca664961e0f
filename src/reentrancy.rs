//! Debug-only reentrancy guard.
//!
//! Detects a thread re-entering a lock tier it already holds, e.g. a
//! closure passed to `StripedHashTable::with` that calls back into the same
//! table. `parking_lot` locks are not reentrant, so without the guard such
//! code deadlocks (or only deadlocks once a writer is queued). In debug
//! builds the second entry panics instead. In release builds, this compiles
//! to a zero-cost no-op.
//!
//! Tracking is per thread: distinct threads entering the same tracker is
//! the normal concurrent case and never panics.

use core::marker::PhantomData;

#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};
#[cfg(debug_assertions)]
use std::cell::RefCell;

#[cfg(debug_assertions)]
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[cfg(debug_assertions)]
thread_local! {
    // Trackers currently entered by this thread.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Per-lock reentrancy tracker. Embed this next to a lock and guard every
/// acquisition with `let _g = self.reentrancy.enter();` taken *before* the
/// lock, so the guard outlives the lock guard.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: usize,
}

impl DebugReentrancy {
    /// Create a new tracker with a process-unique identity.
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Enter a guarded section. In debug builds, panics if the current
    /// thread already holds this tracker.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let id = self.id;
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                assert!(
                    !held.contains(&id),
                    "reentrancy detected: nested entry into a held table lock"
                );
                held.push(id);
            });
            return ReentrancyGuard {
                owner: self,
                _nosend: PhantomData,
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return ReentrancyGuard {
                _z: PhantomData,
                _nosend: PhantomData,
            };
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`. Must be dropped on the
/// thread that created it.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
    _nosend: PhantomData<*mut ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let id = self.owner.id;
            // try_with: the thread-local may already be gone during thread teardown.
            let _ = HELD.try_with(|held| {
                let mut held = held.borrow_mut();
                let pos = held.iter().rposition(|&h| h == id);
                debug_assert!(pos.is_some());
                if let Some(pos) = pos {
                    held.remove(pos);
                }
            });
        }
    }
}
