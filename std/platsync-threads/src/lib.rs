//!
//! platsync-threads - Concurrency Primitives
//!
//! Provides threading and synchronization primitives for the host application.
//!
//! ## Locks
//!
//! - `Mutex` - a plain, non-recursive lock with separate `lock`/`unlock`
//! - `ScopeLock` - acquires on construction, releases on every exit path
//! - `ConditionVariable` - wait/signal bound to an external `Mutex`
//!
//! ## Semaphore
//!
//! A counting semaphore that may be destroyed while other threads are blocked
//! on it. Destroy wakes every outstanding holder with a drain pulse and the
//! last one out releases the underlying resources.
//!
//! ## Threads
//!
//! Reference-counted thread handles. A thread always holds a reference to
//! itself until its entry point returns; the creator holds a second one only
//! if it asked for a handle. Whichever reference drops last releases the
//! native handle.
//!
//! ## Async Jobs
//!
//! `AsyncJob` pairs a semaphore with a posted result so any synchronous
//! function can optionally run on a background thread and be awaited.
//!
//! ## C ABI
//!
//! Each module ends with the `platsync_*` functions used by native hosts.
//! Handles are raw pointers; `destroy` functions take the address of the
//! caller's handle and null it.
//!

pub mod async_job;
pub mod condvar;
pub mod mutex;
pub mod semaphore;
pub mod thread;

pub use async_job::*;
pub use condvar::*;
pub use mutex::*;
pub use semaphore::*;
pub use thread::*;

pub use platsync_core::{ResultCode, SyncError, ThreadPriority, Timeout, WAIT_INFINITE};

use std::sync::{MutexGuard, PoisonError};

/// Lock internal state. Nothing panics while holding these locks, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock_state<T>(m: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Heap storage for handles handed across the C ABI.
pub(crate) mod handle {
    use std::alloc::{Layout, alloc, dealloc};

    /// Move `value` to the heap. Returns null if the allocation fails.
    pub(crate) fn into_raw<T>(value: T) -> *mut T {
        unsafe {
            let layout = Layout::new::<T>();
            let ptr = alloc(layout) as *mut T;
            if ptr.is_null() {
                tracing::error!(size = layout.size(), "failed to allocate handle");
                return std::ptr::null_mut();
            }
            std::ptr::write(ptr, value);
            ptr
        }
    }

    /// Drop and free a handle created by `into_raw`. Null is ignored.
    pub(crate) unsafe fn free<T>(ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            std::ptr::drop_in_place(ptr);
            dealloc(ptr as *mut u8, Layout::new::<T>());
        }
    }

    /// Read the handle out of the caller's slot and null the slot.
    pub(crate) unsafe fn take<T>(slot: *mut *mut T) -> *mut T {
        if slot.is_null() {
            return std::ptr::null_mut();
        }
        unsafe {
            let ptr = *slot;
            *slot = std::ptr::null_mut();
            ptr
        }
    }
}
