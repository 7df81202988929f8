//!
//! Reference-Counted Handle Header
//!
//! Shared handles (semaphores, threads) carry a `RefCount` that decides when
//! their native resources are released. Memory safety is provided separately
//! by `Arc`; the count here tracks *logical* holders: the owner, each
//! in-flight waiter, and a thread's own bootstrap wrapper.
//!
//! The count is only ever changed through atomic operations, never under a
//! handle's internal lock, so a destroy racing with a lock acquisition cannot
//! deadlock.
//!

use std::sync::atomic::{AtomicI32, Ordering};

/// Kinds of reference-counted handles, used for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Semaphore,
    Thread,
}

#[derive(Debug)]
pub struct RefCount {
    count: AtomicI32,
    kind: HandleKind,
}

impl RefCount {
    pub fn new(kind: HandleKind, initial: i32) -> Self {
        Self {
            count: AtomicI32::new(initial),
            kind,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Unconditionally add a reference. Only valid while the caller already
    /// holds one.
    pub fn acquire(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a reference unless the count has already reached zero.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop a reference. Returns true for exactly one caller: the one that
    /// took the count to zero.
    pub fn release(&self) -> bool {
        if self.count.fetch_sub(1, Ordering::Release) == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_zero(&self) -> bool {
        self.count() <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_release_reports_zero_once() {
        let rc = RefCount::new(HandleKind::Thread, 2);
        assert!(!rc.release());
        assert!(rc.release());
        assert!(rc.is_zero());
        assert_eq!(rc.kind(), HandleKind::Thread);
    }

    #[test]
    fn test_try_acquire_refuses_after_zero() {
        let rc = RefCount::new(HandleKind::Semaphore, 1);
        assert!(rc.try_acquire());
        assert_eq!(rc.count(), 2);
        assert!(!rc.release());
        assert!(rc.release());
        assert!(!rc.try_acquire());
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn test_concurrent_release_single_winner() {
        let rc = Arc::new(RefCount::new(HandleKind::Semaphore, 64));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let rc = Arc::clone(&rc);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if rc.release() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(rc.is_zero());
    }
}
