//!
//! Reference-Counted Threads
//!
//! Every thread is created with one reference held by its own bootstrap
//! wrapper. If the creator asks for a handle (`ThreadBuilder::spawn`), the
//! count starts at two and the creator owns the second reference through the
//! returned `Thread`. Both sides release independently:
//!
//! - the bootstrap wrapper when the entry point returns (or panics),
//! - the creator when its `Thread` is dropped or destroyed.
//!
//! The native handle is only touched once the count reaches zero. A
//! fire-and-forget thread (`spawn_detached`) therefore cleans up after itself.
//!
//! ## Lifecycle Hook
//!
//! An optional process-wide callback runs on the new thread right before and
//! right after the entry point. Hosts use it to register threads with
//! debuggers or profilers. It has no effect on correctness when unset.
//!
//! ## Timed Join
//!
//! The bootstrap wrapper publishes the entry point's return value under a lock
//! and signals a condition, so `join` can give up after a timeout and report
//! `SyncError::Timeout` distinctly from real failures.
//!

use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use platsync_core::{
    HandleKind, RefCount, Result, ResultCode, SyncError, ThreadDefaults, ThreadPriority, Timeout,
};

use crate::{handle, lock_state};

/// Called with `true` before a thread's entry point runs and `false` after.
pub type CreateCallback = Arc<dyn Fn(&ThreadInfo, bool) + Send + Sync>;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static CREATE_CALLBACK: RwLock<Option<CreateCallback>> = RwLock::new(None);
static THREAD_DEFAULTS: RwLock<Option<ThreadDefaults>> = RwLock::new(None);

thread_local! {
    static CURRENT_ID: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Install or clear the process-wide thread lifecycle callback.
pub fn set_create_callback(callback: Option<CreateCallback>) {
    *CREATE_CALLBACK.write().unwrap_or_else(PoisonError::into_inner) = callback;
}

pub fn create_callback_installed() -> bool {
    CREATE_CALLBACK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Defaults applied by `ThreadBuilder::new` for anything not set explicitly.
pub fn set_thread_defaults(defaults: Option<ThreadDefaults>) {
    *THREAD_DEFAULTS.write().unwrap_or_else(PoisonError::into_inner) = defaults;
}

pub fn thread_defaults() -> ThreadDefaults {
    THREAD_DEFAULTS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_default()
}

fn notify_create_callback(info: &ThreadInfo, starting: bool) {
    let callback = CREATE_CALLBACK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    if let Some(callback) = callback {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(info, starting))).is_err() {
            tracing::warn!(thread_id = info.id, starting, "thread create callback panicked");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    id: u64,
    name: Option<String>,
    native: OnceLock<u64>,
}

impl ThreadInfo {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// OS identity of the thread (`pthread_t` on unix), recorded by the
    /// thread itself before the create callback first runs.
    pub fn native_handle(&self) -> Option<u64> {
        self.native.get().copied()
    }
}

#[cfg(unix)]
fn native_thread_handle() -> u64 {
    unsafe { libc::pthread_self() as usize as u64 }
}

#[cfg(not(unix))]
fn native_thread_handle() -> u64 {
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadExit {
    Returned(u32),
    Panicked,
}

struct ThreadInner {
    info: ThreadInfo,
    refs: RefCount,
    native: StdMutex<Option<JoinHandle<()>>>,
    native_id: OnceLock<std::thread::ThreadId>,
    released: AtomicBool,
    exit: StdMutex<Option<ThreadExit>>,
    exited: Condvar,
    releases: AtomicU32,
}

impl ThreadInner {
    fn publish_exit(&self, exit: ThreadExit) {
        *lock_state(&self.exit) = Some(exit);
        self.exited.notify_all();
    }

    fn drop_ref(&self) {
        if self.refs.release() {
            self.release_native();
        }
    }

    fn release_native(&self) {
        let native = {
            let mut native = lock_state(&self.native);
            self.released.store(true, Ordering::Release);
            native.take()
        };
        // Dropping an unjoined JoinHandle detaches it; the entry point has
        // already returned by the time both references are gone.
        drop(native);

        self.releases.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(thread_id = self.info.id, "thread handle released");
    }

    /// The bootstrap may finish and drop the last reference before the
    /// spawner gets here; in that case the handle is released on the spot.
    fn store_native(&self, join: JoinHandle<()>) {
        let mut native = lock_state(&self.native);
        if self.released.load(Ordering::Acquire) {
            drop(native);
            drop(join);
        } else {
            *native = Some(join);
        }
    }

    fn is_finished(&self) -> bool {
        lock_state(&self.exit).is_some()
    }
}

fn bootstrap<F>(inner: Arc<ThreadInner>, entry: F)
where
    F: FnOnce() -> u32,
{
    let _ = inner.native_id.set(std::thread::current().id());
    let _ = inner.info.native.set(native_thread_handle());
    CURRENT_ID.with(|id| id.set(Some(inner.info.id)));
    notify_create_callback(&inner.info, true);

    let exit = match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(value) => ThreadExit::Returned(value),
        Err(_) => {
            tracing::error!(thread_id = inner.info.id, "thread entry point panicked");
            ThreadExit::Panicked
        }
    };

    notify_create_callback(&inner.info, false);
    inner.publish_exit(exit);
    inner.drop_ref();
}

fn spawn_error(err: std::io::Error) -> SyncError {
    if err.kind() == std::io::ErrorKind::OutOfMemory {
        SyncError::MemoryAllocationFailure
    } else {
        SyncError::Failure(format!("failed to spawn thread: {}", err))
    }
}

#[cfg(unix)]
fn apply_priority(join: &JoinHandle<()>, priority: ThreadPriority) -> Result<()> {
    use std::os::unix::thread::JoinHandleExt;

    let native = join.as_pthread_t() as libc::pthread_t;
    unsafe {
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();
        let rc = libc::pthread_getschedparam(native, &mut policy, &mut param);
        if rc != 0 {
            return Err(SyncError::Failure(format!("pthread_getschedparam failed: {}", rc)));
        }

        let lowest = libc::sched_get_priority_min(policy);
        let highest = libc::sched_get_priority_max(policy);
        if lowest < 0 || highest < 0 {
            return Err(SyncError::Failure(
                "scheduling priority range unavailable".to_string(),
            ));
        }

        param.sched_priority = priority.scale(lowest, highest);
        let rc = libc::pthread_setschedparam(native, policy, &param);
        if rc != 0 {
            return Err(SyncError::Failure(format!("pthread_setschedparam failed: {}", rc)));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_priority(_join: &JoinHandle<()>, priority: ThreadPriority) -> Result<()> {
    tracing::debug!(?priority, "thread priorities are not supported on this platform");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
    priority: Option<ThreadPriority>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Spawn and keep a handle. The caller must eventually drop or destroy it.
    pub fn spawn<F>(self, entry: F) -> Result<Thread>
    where
        F: FnOnce() -> u32 + Send + 'static,
    {
        let inner = self.spawn_inner(entry, true)?;
        Ok(Thread { inner })
    }

    /// Spawn without keeping a handle; the thread releases itself on return.
    pub fn spawn_detached<F>(self, entry: F) -> Result<()>
    where
        F: FnOnce() -> u32 + Send + 'static,
    {
        self.spawn_inner(entry, false).map(|_| ())
    }

    fn spawn_inner<F>(self, entry: F, retain: bool) -> Result<Arc<ThreadInner>>
    where
        F: FnOnce() -> u32 + Send + 'static,
    {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let defaults = thread_defaults();

        let name = self.name.or_else(|| {
            defaults
                .name_prefix
                .as_ref()
                .map(|prefix| format!("{}-{}", prefix, id))
        });
        if name.as_deref().is_some_and(|n| n.contains('\0')) {
            return Err(SyncError::InvalidParameter("thread name contains NUL"));
        }
        let stack_size = self.stack_size.or(defaults.stack_size);
        let priority = self.priority.or(match defaults.priority {
            ThreadPriority::Normal => None,
            other => Some(other),
        });

        let inner = Arc::new(ThreadInner {
            info: ThreadInfo {
                id,
                name: name.clone(),
                native: OnceLock::new(),
            },
            refs: RefCount::new(HandleKind::Thread, if retain { 2 } else { 1 }),
            native: StdMutex::new(None),
            native_id: OnceLock::new(),
            released: AtomicBool::new(false),
            exit: StdMutex::new(None),
            exited: Condvar::new(),
            releases: AtomicU32::new(0),
        });

        let mut builder = std::thread::Builder::new();
        if let Some(name) = &name {
            builder = builder.name(name.clone());
        }
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let boot = Arc::clone(&inner);
        let join = builder
            .spawn(move || bootstrap(boot, entry))
            .map_err(spawn_error)?;

        if let Some(priority) = priority {
            if let Err(err) = apply_priority(&join, priority) {
                tracing::debug!(thread_id = id, %err, "could not apply thread priority");
            }
        }

        inner.store_native(join);
        tracing::debug!(thread_id = id, name = ?name, detached = !retain, "thread created");
        Ok(inner)
    }
}

/// Spawn a thread with default settings and keep a handle to it.
pub fn create<F>(entry: F) -> Result<Thread>
where
    F: FnOnce() -> u32 + Send + 'static,
{
    ThreadBuilder::new().spawn(entry)
}

/// Spawn a fire-and-forget thread with default settings.
pub fn create_detached<F>(entry: F) -> Result<()>
where
    F: FnOnce() -> u32 + Send + 'static,
{
    ThreadBuilder::new().spawn_detached(entry)
}

pub fn sleep_ms(ms: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// Id of the calling thread if it was started through this module.
pub fn current_id() -> Option<u64> {
    CURRENT_ID.with(Cell::get)
}

/// The creator's reference to a running or finished thread.
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl Thread {
    pub fn id(&self) -> u64 {
        self.inner.info.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.info.name()
    }

    pub fn info(&self) -> &ThreadInfo {
        &self.inner.info
    }

    pub fn native_handle(&self) -> Option<u64> {
        self.inner.info.native_handle()
    }

    pub fn ref_count(&self) -> i32 {
        self.inner.refs.count()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the entry point to return and hand back its value.
    pub fn join(&self, timeout: Timeout) -> Result<u32> {
        let inner = &*self.inner;
        if inner.native_id.get() == Some(&std::thread::current().id()) {
            return Err(SyncError::Failure("a thread cannot join itself".to_string()));
        }

        let deadline = timeout.deadline();
        let mut published = lock_state(&inner.exit);
        let exit = loop {
            if let Some(exit) = *published {
                break exit;
            }
            match deadline.remaining() {
                None => {
                    published = inner
                        .exited
                        .wait(published)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(left) if left.is_zero() => return Err(SyncError::Timeout),
                Some(left) => {
                    published = inner
                        .exited
                        .wait_timeout(published, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };
        drop(published);

        let native = lock_state(&inner.native).take();
        if let Some(native) = native {
            // Entry panics are caught in bootstrap, so this only fails if the
            // create callback machinery itself unwound.
            if native.join().is_err() {
                tracing::debug!(thread_id = inner.info.id, "native join reported a panic");
            }
        }

        match exit {
            ThreadExit::Returned(value) => Ok(value),
            ThreadExit::Panicked => Err(SyncError::ThreadPanicked),
        }
    }

    /// Apply a scheduling hint. Does nothing once the thread has been joined.
    pub fn set_priority(&self, priority: ThreadPriority) -> Result<()> {
        let native = lock_state(&self.inner.native);
        match native.as_ref() {
            Some(join) => apply_priority(join, priority),
            None => {
                tracing::trace!(thread_id = self.id(), "set_priority on a joined thread");
                Ok(())
            }
        }
    }

    /// Release the caller's reference. Same as dropping the handle.
    pub fn destroy(self) {}
}

impl Clone for Thread {
    fn clone(&self) -> Self {
        self.inner.refs.acquire();
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.inner.drop_ref();
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.inner.info.id)
            .field("name", &self.inner.info.name)
            .field("native", &self.inner.info.native_handle())
            .field("refs", &self.inner.refs.count())
            .finish_non_exhaustive()
    }
}

pub type ThreadStart = extern "C" fn(*mut c_void) -> u32;
/// Receives the native thread handle (`pthread_t` on unix) and whether the
/// thread is starting or stopping.
pub type ThreadCreateCallbackFn = extern "C" fn(native_handle: u64, starting: bool);

struct UserData(*mut c_void);

unsafe impl Send for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Create a thread running `start(data)`. When `out` is null the thread is
/// fire-and-forget; otherwise `*out` receives a handle the caller must pass to
/// `platsync_thread_destroy`. `flags` is reserved.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_thread_create(
    out: *mut *mut Thread,
    start: Option<ThreadStart>,
    data: *mut c_void,
    _flags: u32,
) -> ResultCode {
    let Some(start) = start else {
        return ResultCode::InvalidParameter;
    };
    let data = UserData(data);
    let entry = move || start(data.get());

    if out.is_null() {
        return match ThreadBuilder::new().spawn_detached(entry) {
            Ok(()) => ResultCode::Success,
            Err(err) => err.code(),
        };
    }

    match ThreadBuilder::new().spawn(entry) {
        Ok(thread) => {
            let ptr = handle::into_raw(thread);
            if ptr.is_null() {
                return ResultCode::MemoryAllocationFailure;
            }
            unsafe { *out = ptr };
            ResultCode::Success
        }
        Err(err) => err.code(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_thread_destroy(slot: *mut *mut Thread) {
    unsafe {
        let thread = handle::take(slot);
        handle::free(thread);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_thread_join(thread: *mut Thread, wait_ms: i32) -> ResultCode {
    if thread.is_null() {
        return ResultCode::InvalidParameter;
    }
    match unsafe { (*thread).join(Timeout::from_ms(wait_ms)) } {
        Ok(_) => ResultCode::Success,
        Err(err) => err.code(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn platsync_thread_set_priority(thread: *mut Thread, priority: i32) {
    if thread.is_null() {
        return;
    }
    if let Some(priority) = ThreadPriority::from_raw(priority) {
        if let Err(err) = unsafe { (*thread).set_priority(priority) } {
            tracing::debug!(%err, "platsync_thread_set_priority failed");
        }
    }
}

/// Install (or clear, with null) the process-wide lifecycle callback.
#[unsafe(no_mangle)]
pub extern "C" fn platsync_thread_set_create_callback(callback: Option<ThreadCreateCallbackFn>) {
    let callback = callback.map(|f| {
        Arc::new(move |info: &ThreadInfo, starting: bool| {
            f(info.native_handle().unwrap_or(0), starting)
        }) as CreateCallback
    });
    set_create_callback(callback);
}
