//!
//! Mutex Implementation
//!
//! A plain mutual-exclusion lock with separate `lock` and `unlock` calls, so it
//! can be held across a C boundary and handed to `ConditionVariable::wait`.
//! The lock is not recursive: locking it twice from the same thread deadlocks.
//!
//! Usage:
//! ```
//! use platsync_threads::Mutex;
//!
//! let m = Mutex::new();
//! {
//!     let _guard = m.scoped();
//!     // exclusive section
//! }
//! assert!(!m.is_locked());
//! ```
//!

use std::sync::{Condvar, Mutex as StdMutex, PoisonError};

use crate::{handle, lock_state};

#[derive(Debug, Default)]
pub struct Mutex {
    locked: StdMutex<bool>,
    released: Condvar,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        let mut locked = lock_state(&self.locked);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    pub fn try_lock(&self) -> bool {
        let mut locked = lock_state(&self.locked);
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    /// Release the lock. Unlocking a mutex that is not held does nothing.
    pub fn unlock(&self) {
        let mut locked = lock_state(&self.locked);
        if *locked {
            *locked = false;
            drop(locked);
            self.released.notify_one();
        }
    }

    pub fn is_locked(&self) -> bool {
        *lock_state(&self.locked)
    }

    pub fn scoped(&self) -> ScopeLock<'_> {
        ScopeLock::new(Some(self))
    }
}

/// Holds a `Mutex` for the lifetime of the value, including during unwinding.
/// Constructed with `None` it does nothing.
#[must_use = "the mutex is released as soon as the ScopeLock is dropped"]
pub struct ScopeLock<'a> {
    mutex: Option<&'a Mutex>,
}

impl<'a> ScopeLock<'a> {
    pub fn new(mutex: Option<&'a Mutex>) -> Self {
        if let Some(m) = mutex {
            m.lock();
        }
        Self { mutex }
    }
}

impl Drop for ScopeLock<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.mutex {
            m.unlock();
        }
    }
}

/// Create a mutex. Returns null if the handle cannot be allocated.
#[unsafe(no_mangle)]
pub extern "C" fn platsync_mutex_create() -> *mut Mutex {
    handle::into_raw(Mutex::new())
}

/// Destroy the mutex in `*slot` and null the slot.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_mutex_destroy(slot: *mut *mut Mutex) {
    unsafe {
        let m = handle::take(slot);
        handle::free(m);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_mutex_lock(m: *mut Mutex) {
    if !m.is_null() {
        unsafe { (*m).lock() }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_mutex_unlock(m: *mut Mutex) {
    if !m.is_null() {
        unsafe { (*m).unlock() }
    }
}
