//!
//! Condition Variable
//!
//! A wait/signal primitive used together with an external `Mutex`. The caller
//! must hold the mutex when calling `wait`; the wait releases it, blocks, and
//! reacquires it before returning whether it was signaled or timed out.
//! Waiting without holding the mutex is a caller error and is not checked.
//!
//! Each waiter takes a ticket when it starts waiting. `signal(n)` hands wake
//! grants to the `n` oldest tickets still waiting, so a signal only ever wakes
//! threads that were already blocked when it was sent. Signals sent while
//! nobody waits are not remembered.
//!

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex as StdMutex, PoisonError};

use platsync_core::Timeout;

use crate::mutex::Mutex;
use crate::{handle, lock_state};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

#[derive(Debug, Default)]
struct WaitQueue {
    next_ticket: u64,
    waiting: VecDeque<u64>,
    signaled: HashSet<u64>,
}

#[derive(Debug, Default)]
pub struct ConditionVariable {
    queue: StdMutex<WaitQueue>,
    wake: Condvar,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake up to `count` threads currently blocked in `wait`.
    pub fn signal(&self, count: u32) {
        let mut queue = lock_state(&self.queue);
        let mut woken = 0;
        while woken < count {
            match queue.waiting.pop_front() {
                Some(ticket) => {
                    queue.signaled.insert(ticket);
                    woken += 1;
                }
                None => break,
            }
        }
        drop(queue);

        if woken > 0 {
            self.wake.notify_all();
        }
    }

    pub fn signal_one(&self) {
        self.signal(1);
    }

    pub fn broadcast(&self) {
        self.signal(u32::MAX);
    }

    pub fn waiter_count(&self) -> usize {
        lock_state(&self.queue).waiting.len()
    }

    pub fn wait(&self, mutex: &Mutex, timeout: Timeout) -> WaitStatus {
        let deadline = timeout.deadline();
        let mut queue = lock_state(&self.queue);
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.waiting.push_back(ticket);

        // Queue lock is held across the release, so no signal can slip in
        // between dropping the caller's mutex and going to sleep.
        mutex.unlock();

        let status = loop {
            if queue.signaled.remove(&ticket) {
                break WaitStatus::Signaled;
            }
            match deadline.remaining() {
                None => {
                    queue = self
                        .wake
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(left) if left.is_zero() => {
                    queue.waiting.retain(|t| *t != ticket);
                    break WaitStatus::TimedOut;
                }
                Some(left) => {
                    queue = self
                        .wake
                        .wait_timeout(queue, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };
        drop(queue);

        mutex.lock();
        status
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn platsync_condvar_create() -> *mut ConditionVariable {
    handle::into_raw(ConditionVariable::new())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_condvar_destroy(slot: *mut *mut ConditionVariable) {
    unsafe {
        let cv = handle::take(slot);
        handle::free(cv);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_condvar_signal(cv: *mut ConditionVariable, count: i32) {
    if !cv.is_null() && count > 0 {
        unsafe { (*cv).signal(count as u32) }
    }
}

/// Returns 0 when signaled, 1 on timeout, 2 if either handle is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_condvar_wait(
    cv: *mut ConditionVariable,
    mutex: *mut Mutex,
    wait_ms: i32,
) -> i32 {
    if cv.is_null() || mutex.is_null() {
        return 2;
    }

    unsafe {
        match (*cv).wait(&*mutex, Timeout::from_ms(wait_ms)) {
            WaitStatus::Signaled => 0,
            WaitStatus::TimedOut => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    struct Monitor {
        lock: Mutex,
        cv: ConditionVariable,
        ready: AtomicBool,
    }

    fn wait_for_waiters(cv: &ConditionVariable, n: usize) {
        let start = Instant::now();
        while cv.waiter_count() < n {
            assert!(start.elapsed() < Duration::from_secs(5), "waiters never blocked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wait_times_out_and_reacquires() {
        let lock = Mutex::new();
        let cv = ConditionVariable::new();

        lock.lock();
        let start = Instant::now();
        let status = cv.wait(&lock, Timeout::Millis(50));
        let elapsed = start.elapsed();

        assert_eq!(status, WaitStatus::TimedOut);
        assert!(elapsed >= Duration::from_millis(45), "returned after {:?}", elapsed);
        assert!(lock.is_locked());
        assert_eq!(cv.waiter_count(), 0);
        lock.unlock();
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let monitor = Arc::new(Monitor {
            lock: Mutex::new(),
            cv: ConditionVariable::new(),
            ready: AtomicBool::new(false),
        });

        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                monitor.lock.lock();
                while !monitor.ready.load(Ordering::SeqCst) {
                    monitor.cv.wait(&monitor.lock, Timeout::Infinite);
                }
                monitor.lock.unlock();
            })
        };

        wait_for_waiters(&monitor.cv, 1);
        monitor.lock.lock();
        monitor.ready.store(true, Ordering::SeqCst);
        monitor.cv.signal_one();
        monitor.lock.unlock();

        waiter.join().unwrap();
    }

    #[test]
    fn test_signal_count_limits_wakeups() {
        let monitor = Arc::new(Monitor {
            lock: Mutex::new(),
            cv: ConditionVariable::new(),
            ready: AtomicBool::new(false),
        });
        let woken = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    monitor.lock.lock();
                    let status = monitor.cv.wait(&monitor.lock, Timeout::Millis(2_000));
                    monitor.lock.unlock();
                    if status == WaitStatus::Signaled {
                        woken.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        wait_for_waiters(&monitor.cv, 4);
        monitor.cv.signal(2);

        let start = Instant::now();
        while woken.load(Ordering::SeqCst) < 2 {
            assert!(start.elapsed() < Duration::from_secs(1));
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(monitor.cv.waiter_count(), 2);

        monitor.cv.broadcast();
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_signal_without_waiters_is_forgotten() {
        let lock = Mutex::new();
        let cv = ConditionVariable::new();
        cv.signal(3);

        lock.lock();
        assert_eq!(cv.wait(&lock, Timeout::Millis(10)), WaitStatus::TimedOut);
        lock.unlock();
    }

    #[test]
    fn test_c_abi_wait() {
        unsafe {
            let mut m = crate::mutex::platsync_mutex_create();
            let mut cv = platsync_condvar_create();

            assert_eq!(platsync_condvar_wait(cv, std::ptr::null_mut(), 0), 2);

            crate::mutex::platsync_mutex_lock(m);
            assert_eq!(platsync_condvar_wait(cv, m, 5), 1);
            crate::mutex::platsync_mutex_unlock(m);

            platsync_condvar_signal(cv, 1);
            platsync_condvar_destroy(&mut cv);
            crate::mutex::platsync_mutex_destroy(&mut m);
            assert!(cv.is_null());
            assert!(m.is_null());
        }
    }
}
