//!
//! Async Jobs
//!
//! An `AsyncJob` is a one-slot mailbox guarded by a semaphore. A producer
//! posts a value with `set_result` (which also posts one semaphore unit) and a
//! consumer blocks in `get_result` until that unit arrives.
//!
//! `call` is the adapter that lets any synchronous function run either inline
//! (no job) or on a fire-and-forget thread whose result lands in the job:
//!
//! ```
//! use platsync_threads::{AsyncJob, call};
//!
//! let job = AsyncJob::new();
//! assert_eq!(call(Some(&job), || 6 * 7).unwrap(), None);
//! assert_eq!(job.get_result().unwrap(), 42);
//!
//! assert_eq!(call::<i32, _>(None, || 6 * 7).unwrap(), Some(42));
//! ```
//!
//! Posting twice before a read keeps only the latest value but leaves two
//! units on the semaphore, so two reads succeed and both see that value.
//!

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex};

use platsync_core::{Result, ResultCode, SyncError, Timeout};

use crate::semaphore::Semaphore;
use crate::thread::create_detached;
use crate::{handle, lock_state};

#[derive(Debug)]
struct JobSlot<T> {
    value: Option<T>,
    pending: u32,
}

#[derive(Debug)]
pub struct AsyncJob<T = i32> {
    semaphore: Semaphore,
    slot: Arc<StdMutex<JobSlot<T>>>,
}

impl<T> AsyncJob<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(),
            slot: Arc::new(StdMutex::new(JobSlot {
                value: None,
                pending: 0,
            })),
        }
    }

    /// Post a result and wake one reader.
    pub fn set_result(&self, value: T) {
        post(&self.semaphore, &self.slot, value);
    }

    /// Block until a result is posted, then return it.
    pub fn get_result(&self) -> Result<T> {
        self.semaphore.wait(Timeout::Infinite)?;
        take(&self.slot)
    }

    /// Like `get_result` but gives up after `timeout`. `None` means nothing
    /// was posted in time (or the job was torn down).
    pub fn get_result_timeout(&self, timeout: Timeout) -> Option<T> {
        match self.semaphore.wait(timeout).and_then(|()| take(&self.slot)) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::trace!(%err, "async job result not available");
                None
            }
        }
    }

    /// A sendable handle the producer uses to post into this job.
    pub fn completer(&self) -> JobCompleter<T> {
        JobCompleter {
            semaphore: self.semaphore.clone(),
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.semaphore.is_destroyed()
    }

    /// Tear the job down, waking any reader with `SyncError::Destroyed`.
    pub fn destroy(self) {}
}

impl<T> Default for AsyncJob<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for AsyncJob<T> {
    fn drop(&mut self) {
        self.semaphore.destroy();
    }
}

fn post<T>(semaphore: &Semaphore, slot: &StdMutex<JobSlot<T>>, value: T) {
    {
        let mut slot = lock_state(slot);
        if slot.pending > 0 {
            tracing::warn!(
                pending = slot.pending,
                "async job result overwritten before it was read"
            );
        }
        slot.value = Some(value);
        slot.pending += 1;
    }
    semaphore.increment(1);
}

/// Only called after a semaphore unit was taken, which implies a post.
fn take<T: Clone>(slot: &StdMutex<JobSlot<T>>) -> Result<T> {
    let mut slot = lock_state(slot);
    slot.pending = slot.pending.saturating_sub(1);
    slot.value
        .clone()
        .ok_or_else(|| SyncError::Failure("async job woke without a posted result".to_string()))
}

/// Producer side of an `AsyncJob`.
#[derive(Debug)]
pub struct JobCompleter<T> {
    semaphore: Semaphore,
    slot: Arc<StdMutex<JobSlot<T>>>,
}

impl<T> JobCompleter<T> {
    pub fn complete(self, value: T) {
        post(&self.semaphore, &self.slot, value);
    }

    /// Give up without a result. Readers waiting on the job see `Destroyed`.
    pub fn abandon(self) {
        tracing::warn!("async job abandoned without a result");
        self.semaphore.destroy();
    }
}

/// Run `work` inline when `job` is `None` and return its value; otherwise run
/// it on a detached thread, post the value into `job` and return `None`.
///
/// If `work` panics on the background thread the job is abandoned so readers
/// do not block forever.
pub fn call<T, F>(job: Option<&AsyncJob<T>>, work: F) -> Result<Option<T>>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(job) = job else {
        return Ok(Some(work()));
    };

    let completer = job.completer();
    create_detached(move || match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => {
            completer.complete(value);
            0
        }
        Err(payload) => {
            completer.abandon();
            panic::resume_unwind(payload)
        }
    })?;
    Ok(None)
}

pub type AsyncWork = extern "C" fn(*mut c_void) -> i32;

struct WorkData(*mut c_void);

unsafe impl Send for WorkData {}

impl WorkData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Host result codes are an open set, so the C ABI carries them as raw
/// `i32`s. Only the job's own status is reported as a `ResultCode`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_job_create(out: *mut *mut AsyncJob) -> ResultCode {
    if out.is_null() {
        return ResultCode::InvalidParameter;
    }
    let job = handle::into_raw(AsyncJob::<i32>::new());
    if job.is_null() {
        return ResultCode::MemoryAllocationFailure;
    }
    unsafe { *out = job };
    ResultCode::Success
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_job_destroy(slot: *mut *mut AsyncJob) {
    unsafe {
        let job = handle::take(slot);
        handle::free(job);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_job_set_result(job: *mut AsyncJob, result: i32) {
    if !job.is_null() {
        unsafe { (*job).set_result(result) }
    }
}

/// Returns the posted code unchanged, or the job's failure status.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_job_get_result(job: *mut AsyncJob) -> i32 {
    if job.is_null() {
        return ResultCode::InvalidParameter.as_raw();
    }
    match unsafe { (*job).get_result() } {
        Ok(code) => code,
        Err(err) => err.code().as_raw(),
    }
}

/// Returns true and writes `*result` if a result arrived within `wait_ms`.
/// On false `*result` is left untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_job_get_result_timeout(
    job: *mut AsyncJob,
    result: *mut i32,
    wait_ms: i32,
) -> bool {
    if job.is_null() || result.is_null() {
        return false;
    }
    match unsafe { (*job).get_result_timeout(Timeout::from_ms(wait_ms)) } {
        Some(code) => {
            unsafe { *result = code };
            true
        }
        None => false,
    }
}

/// With a null `job`, runs `func(data)` inline and returns its result as is.
/// Otherwise starts it in the background and returns `Success` once launched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_async_call(
    job: *mut AsyncJob,
    func: Option<AsyncWork>,
    data: *mut c_void,
) -> i32 {
    let Some(func) = func else {
        return ResultCode::InvalidParameter.as_raw();
    };
    let data = WorkData(data);
    let job = unsafe { job.as_ref() };

    match call(job, move || func(data.get())) {
        Ok(Some(code)) => code,
        Ok(None) => ResultCode::Success.as_raw(),
        Err(err) => err.code().as_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::Semaphore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_set_then_get_same_thread() {
        let job = AsyncJob::new();
        job.set_result(ResultCode::Timeout);
        assert_eq!(job.get_result().unwrap(), ResultCode::Timeout);
    }

    #[test]
    fn test_get_timeout_before_any_result() {
        let job: AsyncJob<u64> = AsyncJob::new();
        let start = Instant::now();
        assert_eq!(job.get_result_timeout(Timeout::Millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(45));

        job.set_result(9);
        assert_eq!(job.get_result_timeout(Timeout::Millis(50)), Some(9));
    }

    #[test]
    fn test_sync_and_async_results_match() {
        fn checksum() -> u32 {
            (1..=100u32).sum()
        }

        let inline = call::<u32, _>(None, checksum).unwrap();
        assert_eq!(inline, Some(5050));

        let job = AsyncJob::new();
        assert_eq!(call(Some(&job), checksum).unwrap(), None);
        assert_eq!(job.get_result().unwrap(), 5050);
    }

    #[test]
    fn test_double_set_keeps_latest_value() {
        let job = AsyncJob::new();
        job.set_result(1u8);
        job.set_result(2u8);
        assert_eq!(job.get_result().unwrap(), 2);
        assert_eq!(job.get_result().unwrap(), 2);
        assert_eq!(job.get_result_timeout(Timeout::Millis(0)), None);
    }

    #[test]
    fn test_destroy_while_background_completer_runs() {
        let gate = Semaphore::new();
        let job: AsyncJob<u32> = AsyncJob::new();
        {
            let gate = gate.clone();
            call(Some(&job), move || {
                let _ = gate.wait(Timeout::Millis(5_000));
                3
            })
            .unwrap();
        }

        let completer = job.completer();
        job.destroy();
        gate.increment(1);

        // A late post after teardown is dropped on the floor.
        completer.complete(4);
    }

    #[test]
    fn test_reader_unblocked_by_destroy() {
        let job: AsyncJob<u32> = AsyncJob::new();
        let completer = job.completer();
        let reader = {
            let semaphore = job.semaphore.clone();
            let slot = Arc::clone(&job.slot);
            std::thread::spawn(move || semaphore.wait(Timeout::Infinite).and_then(|()| take(&slot)))
        };
        std::thread::sleep(Duration::from_millis(20));
        completer.abandon();
        assert!(matches!(reader.join().unwrap(), Err(SyncError::Destroyed)));
        assert!(job.is_destroyed());
    }

    #[test]
    fn test_panicking_work_abandons_job() {
        let job: AsyncJob<u32> = AsyncJob::new();
        call(Some(&job), || -> u32 { panic!("work failed") }).unwrap();
        assert!(matches!(job.get_result(), Err(SyncError::Destroyed)));
    }

    extern "C" fn bump(data: *mut c_void) -> i32 {
        let counter = unsafe { &*(data as *const AtomicU32) };
        counter.fetch_add(1, Ordering::SeqCst);
        ResultCode::InvalidParameter as i32
    }

    extern "C" fn host_code(_data: *mut c_void) -> i32 {
        42
    }

    #[test]
    fn test_c_abi_async_call() {
        let counter = Box::new(AtomicU32::new(0));
        let data = &*counter as *const AtomicU32 as *mut c_void;

        unsafe {
            assert_eq!(
                platsync_async_call(std::ptr::null_mut(), Some(bump), data),
                ResultCode::InvalidParameter as i32
            );

            let mut job: *mut AsyncJob = std::ptr::null_mut();
            assert_eq!(platsync_async_job_create(&mut job), ResultCode::Success);

            let mut code = -7;
            assert!(!platsync_async_job_get_result_timeout(job, &mut code, 10));
            assert_eq!(code, -7);

            assert_eq!(platsync_async_call(job, Some(bump), data), 0);
            assert_eq!(
                platsync_async_job_get_result(job),
                ResultCode::InvalidParameter as i32
            );

            platsync_async_job_set_result(job, ResultCode::Timeout as i32);
            assert!(platsync_async_job_get_result_timeout(job, &mut code, -1));
            assert_eq!(code, ResultCode::Timeout as i32);

            platsync_async_job_destroy(&mut job);
            assert!(job.is_null());
            assert_eq!(
                platsync_async_job_get_result(std::ptr::null_mut()),
                ResultCode::InvalidParameter as i32
            );
            assert_eq!(
                platsync_async_call(job, None, data),
                ResultCode::InvalidParameter as i32
            );
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_c_abi_keeps_host_codes_outside_result_code() {
        unsafe {
            let direct = host_code(std::ptr::null_mut());
            let inline = platsync_async_call(std::ptr::null_mut(), Some(host_code), std::ptr::null_mut());
            assert_eq!(inline, direct);
            assert_eq!(inline, 42);

            let mut job: *mut AsyncJob = std::ptr::null_mut();
            assert_eq!(platsync_async_job_create(&mut job), ResultCode::Success);

            platsync_async_job_set_result(job, 42);
            assert_eq!(platsync_async_job_get_result(job), 42);

            platsync_async_job_set_result(job, -1234);
            let mut code = 0;
            assert!(platsync_async_job_get_result_timeout(job, &mut code, 1_000));
            assert_eq!(code, -1234);

            assert_eq!(platsync_async_call(job, Some(host_code), std::ptr::null_mut()), 0);
            assert_eq!(platsync_async_job_get_result(job), 42);

            platsync_async_job_destroy(&mut job);
        }
    }
}
