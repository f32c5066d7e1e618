//! Optional application lock around update bookkeeping.
//!
//! When the application marks paths updated from threads other than the
//! processing loop, it supplies an [`UpdateMutex`]. The client takes it
//! around every operation that touches the update path sets. The lock must
//! be recursive: an update operation can trigger an event whose handler
//! marks more paths updated.

use lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A recursive lock supplied by the application.
pub trait UpdateMutex: Send + Sync {
    /// Acquire the lock, blocking until available.
    fn lock(&self);

    /// Release one level of the lock.
    fn unlock(&self);
}

/// Shared lock handle.
pub type UpdateMutexRef = Arc<dyn UpdateMutex>;

/// Holds the update lock until dropped. Holds nothing when no lock is set.
pub(crate) struct UpdateGuard(Option<UpdateMutexRef>);

impl UpdateGuard {
    pub(crate) fn acquire(mutex: Option<&UpdateMutexRef>) -> Self {
        let held = mutex.map(Arc::clone);
        if let Some(mutex) = &held {
            mutex.lock();
        }
        Self(held)
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        if let Some(mutex) = self.0.take() {
            mutex.unlock();
        }
    }
}

/// Recursive mutex over `parking_lot`'s reentrant raw lock.
pub struct RecursiveMutex {
    raw: RawReentrantMutex<RawMutex, RawThreadId>,
    // written only by the owning thread
    depth: AtomicUsize,
}

impl RecursiveMutex {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
            depth: AtomicUsize::new(0),
        }
    }

    /// Lock depth held by the calling thread.
    pub fn depth(&self) -> usize {
        if self.raw.is_owned_by_current_thread() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecursiveMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("locked", &self.raw.is_locked())
            .finish()
    }
}

impl UpdateMutex for RecursiveMutex {
    fn lock(&self) {
        self.raw.lock();
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    fn unlock(&self) {
        if !self.raw.is_owned_by_current_thread() {
            tracing::warn!("update mutex unlocked by a thread that does not hold it");
            return;
        }
        self.depth.fetch_sub(1, Ordering::Relaxed);
        // SAFETY: the calling thread holds at least one level of the lock,
        // checked just above.
        unsafe { self.raw.unlock() };
    }
}
