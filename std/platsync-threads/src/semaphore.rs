//!
//! Semaphore
//!
//! A counting semaphore that can be destroyed while other threads are blocked
//! in `wait` or about to call it.
//!
//! ## Lifetime
//!
//! The creator holds one implicit reference. Every `wait` and `increment`
//! takes a temporary reference for the duration of the call, and only if the
//! count has not already reached zero. `destroy`:
//!
//! 1. marks the semaphore as draining (new waits and increments bail out),
//! 2. drops the creator's reference,
//! 3. if holders remain, posts one unit and one wake per outstanding
//!    reference so every blocked waiter leaves its loop.
//!
//! Whoever drops the count to zero releases the semaphore. That happens
//! exactly once no matter how many destroy, wait and increment calls race.
//! Concurrent destroy calls are gated by a compare-and-swap so only one of
//! them runs the drain.
//!
//! Handles are `Arc`s, so the memory stays valid for every holder; the
//! reference count governs the logical state only.
//!

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, PoisonError};

use platsync_core::{HandleKind, RefCount, Result, SyncError, Timeout};

use crate::lock_state;

#[derive(Debug, Default)]
struct SemaphoreState {
    count: i32,
    draining: bool,
    released: bool,
}

impl SemaphoreState {
    /// Add up to `units`, waking one waiter each. The count stops at
    /// `i32::MAX`; units past that are dropped.
    fn post(&mut self, condition: &Condvar, units: u32) {
        for posted in 0..units {
            match self.count.checked_add(1) {
                Some(next) => self.count = next,
                None => {
                    tracing::warn!(dropped = units - posted, "semaphore count saturated");
                    return;
                }
            }
            condition.notify_one();
        }
    }
}

#[derive(Debug)]
pub struct SemaphoreInner {
    state: StdMutex<SemaphoreState>,
    condition: Condvar,
    refs: RefCount,
    destroy_requested: AtomicBool,
    releases: AtomicU32,
}

impl SemaphoreInner {
    fn release_resources(&self) {
        let mut state = lock_state(&self.state);
        if state.released {
            tracing::warn!("semaphore released twice");
            return;
        }
        state.released = true;
        state.count = 0;
        drop(state);

        self.releases.fetch_add(1, Ordering::SeqCst);
        self.condition.notify_all();
        tracing::debug!("semaphore released");
    }

    /// Drop one reference, releasing the semaphore if it was the last.
    fn drop_ref(&self) -> bool {
        if self.refs.release() {
            self.release_resources();
            true
        } else {
            false
        }
    }
}

impl Drop for SemaphoreInner {
    fn drop(&mut self) {
        let released = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .released;
        if !released {
            tracing::debug!("last semaphore handle dropped without destroy");
            self.release_resources();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub fn new() -> Self {
        Self::with_count(0)
    }

    /// A semaphore holding `initial` units up front, capped at `i32::MAX`.
    pub fn with_count(initial: u32) -> Self {
        let count = i32::try_from(initial).unwrap_or(i32::MAX);
        Self {
            inner: Arc::new(SemaphoreInner {
                state: StdMutex::new(SemaphoreState {
                    count,
                    ..SemaphoreState::default()
                }),
                condition: Condvar::new(),
                refs: RefCount::new(HandleKind::Semaphore, 1),
                destroy_requested: AtomicBool::new(false),
                releases: AtomicU32::new(0),
            }),
        }
    }

    /// Deposit `count` units, waking one waiter per unit. Does nothing once
    /// the semaphore is draining or destroyed.
    pub fn increment(&self, count: u32) {
        let inner = &*self.inner;
        if count == 0 || !inner.refs.try_acquire() {
            return;
        }

        {
            let mut state = lock_state(&inner.state);
            if !state.draining {
                state.post(&inner.condition, count);
            }
        }

        inner.drop_ref();
    }

    /// Take one unit, blocking up to `timeout`.
    ///
    /// Returns `Err(Timeout)` when no unit arrived in time and `Err(Destroyed)`
    /// when the semaphore was destroyed before or during the wait.
    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        let inner = &*self.inner;
        if !inner.refs.try_acquire() {
            return Err(SyncError::Destroyed);
        }

        let deadline = timeout.deadline();
        let mut state = lock_state(&inner.state);
        let outcome = loop {
            if state.draining {
                if state.count > 0 {
                    state.count -= 1;
                }
                break Err(SyncError::Destroyed);
            }
            if state.count > 0 {
                state.count -= 1;
                break Ok(());
            }
            match deadline.remaining() {
                None => {
                    state = inner
                        .condition
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(left) if left.is_zero() => break Err(SyncError::Timeout),
                Some(left) => {
                    state = inner
                        .condition
                        .wait_timeout(state, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };
        drop(state);

        if inner.drop_ref() {
            return Err(SyncError::Destroyed);
        }
        outcome
    }

    /// Start teardown. Returns true for the single call that performed it;
    /// every later or concurrent call is a no-op returning false.
    pub fn destroy(&self) -> bool {
        let inner = &*self.inner;
        if inner
            .destroy_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        lock_state(&inner.state).draining = true;

        if inner.drop_ref() {
            return true;
        }

        let mut state = lock_state(&inner.state);
        let outstanding = inner.refs.count().max(0);
        tracing::debug!(outstanding, "draining semaphore");
        state.post(&inner.condition, outstanding as u32);
        drop(state);
        inner.condition.notify_all();
        true
    }

    pub fn count(&self) -> i32 {
        lock_state(&self.inner.state).count
    }

    pub fn ref_count(&self) -> i32 {
        self.inner.refs.count()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroy_requested.load(Ordering::Acquire) || self.inner.refs.is_zero()
    }

    pub fn is_released(&self) -> bool {
        lock_state(&self.inner.state).released
    }

    /// How many times the underlying resources were released: 0 while live,
    /// 1 afterwards.
    pub fn release_count(&self) -> u32 {
        self.inner.releases.load(Ordering::SeqCst)
    }

    fn into_raw(self) -> *mut SemaphoreInner {
        Arc::into_raw(self.inner) as *mut SemaphoreInner
    }

    /// Borrow a raw handle as an owned `Semaphore` for the duration of a call.
    unsafe fn from_borrowed(ptr: *mut SemaphoreInner) -> Option<Semaphore> {
        if ptr.is_null() {
            return None;
        }
        unsafe {
            Arc::increment_strong_count(ptr as *const SemaphoreInner);
            Some(Semaphore {
                inner: Arc::from_raw(ptr as *const SemaphoreInner),
            })
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn platsync_semaphore_create() -> *mut SemaphoreInner {
    Semaphore::new().into_raw()
}

/// Negative counts start empty.
#[unsafe(no_mangle)]
pub extern "C" fn platsync_semaphore_create_with_count(count: i32) -> *mut SemaphoreInner {
    Semaphore::with_count(count.max(0) as u32).into_raw()
}

/// Destroy the semaphore in `*slot`. The slot is swapped to null atomically,
/// so when several threads destroy through the same slot only one proceeds.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_semaphore_destroy(slot: *mut *mut SemaphoreInner) {
    if slot.is_null() {
        return;
    }

    let slot = unsafe { AtomicPtr::from_ptr(slot) };
    let current = slot.load(Ordering::Acquire);
    if current.is_null()
        || slot
            .compare_exchange(current, std::ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    {
        return;
    }

    let sem = Semaphore {
        inner: unsafe { Arc::from_raw(current as *const SemaphoreInner) },
    };
    if !sem.destroy() {
        // Another slot already tore this semaphore down and gave back the
        // creator's Arc.
        std::mem::forget(sem);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_semaphore_increment(sem: *mut SemaphoreInner, count: i32) {
    if count <= 0 {
        return;
    }
    if let Some(sem) = unsafe { Semaphore::from_borrowed(sem) } {
        sem.increment(count as u32);
    }
}

/// Returns 0 on success, 1 on timeout and -1 if the semaphore is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_semaphore_wait(sem: *mut SemaphoreInner, wait_ms: i32) -> i32 {
    let Some(sem) = (unsafe { Semaphore::from_borrowed(sem) }) else {
        return -1;
    };

    match sem.wait(Timeout::from_ms(wait_ms)) {
        Ok(()) => 0,
        Err(SyncError::Destroyed) => -1,
        Err(_) => 1,
    }
}
