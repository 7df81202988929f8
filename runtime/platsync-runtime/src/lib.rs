///
/// platsync Runtime Static Library
///
/// Bundles every platsync crate into one static library (libplatsync_runtime.a)
/// that native hosts link against, and owns process-level setup:
///
/// - installs the tracing subscriber described by `[logging]`
/// - records `[threads]` defaults used by every `ThreadBuilder`
/// - installs a thread lifecycle hook that traces start and stop
///
/// Only one runtime may be live at a time. `init` hands back a `RuntimeGuard`;
/// dropping it (or calling `shutdown`) undoes everything except the
/// subscriber, which stays installed for the rest of the process.
///

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tracing_subscriber::EnvFilter;

pub use platsync_core::*;
pub use platsync_threads::*;

/// Environment variable naming a TOML config for `platsync_runtime_init`.
pub const CONFIG_ENV: &str = "PLATSYNC_CONFIG";

static ACTIVE: AtomicBool = AtomicBool::new(false);
static C_GUARD: StdMutex<Option<RuntimeGuard>> = StdMutex::new(None);

#[derive(Debug)]
#[must_use = "the runtime shuts down as soon as the guard is dropped"]
pub struct RuntimeGuard {
    _private: (),
}

impl RuntimeGuard {
    pub fn shutdown(self) {}
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        set_create_callback(None);
        set_thread_defaults(None);
        ACTIVE.store(false, Ordering::Release);
        tracing::debug!("platsync runtime shut down");
    }
}

pub fn init(config: &RuntimeConfig) -> Result<RuntimeGuard> {
    config.validate(Path::new("<runtime>"))?;

    if ACTIVE
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(SyncError::Failure(
            "platsync runtime is already initialized".to_string(),
        ));
    }

    install_logging(&config.logging);
    set_thread_defaults(Some(config.threads.clone()));
    set_create_callback(Some(Arc::new(|info: &ThreadInfo, starting: bool| {
        tracing::trace!(
            thread_id = info.id(),
            name = info.name().unwrap_or("<unnamed>"),
            starting,
            "thread lifecycle"
        );
    })));

    tracing::info!(
        stack_size = ?config.threads.stack_size,
        priority = ?config.threads.priority,
        "platsync runtime initialized"
    );
    Ok(RuntimeGuard { _private: () })
}

pub fn init_from_file(path: &Path) -> Result<RuntimeGuard> {
    init(&RuntimeConfig::load(path)?)
}

fn install_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.directive()));

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter);

    let installed = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Full => builder.try_init(),
    };
    if installed.is_err() {
        tracing::debug!("a global subscriber is already installed, keeping it");
    }
}

/// Initialize from `$PLATSYNC_CONFIG` if set, otherwise from defaults.
#[unsafe(no_mangle)]
pub extern "C" fn platsync_runtime_init() -> ResultCode {
    let guard = match std::env::var_os(CONFIG_ENV) {
        Some(path) => init_from_file(Path::new(&path)),
        None => init(&RuntimeConfig::default()),
    };

    match guard {
        Ok(guard) => {
            *C_GUARD.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
            ResultCode::Success
        }
        Err(err) => {
            tracing::error!(%err, "platsync_runtime_init failed");
            err.code()
        }
    }
}

/// Undo `platsync_runtime_init`. Does nothing if it was never called.
#[unsafe(no_mangle)]
pub extern "C" fn platsync_runtime_shutdown() {
    let guard = C_GUARD
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    static SERIAL: StdMutex<()> = StdMutex::new(());

    fn serial() -> std::sync::MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn test_second_init_fails_while_live() {
        let _serial = serial();
        let guard = init(&RuntimeConfig::default()).unwrap();
        assert!(create_callback_installed());

        let err = init(&RuntimeConfig::default()).unwrap_err();
        assert_eq!(err.code(), ResultCode::Failure);

        guard.shutdown();
        assert!(!create_callback_installed());

        let again = init(&RuntimeConfig::default()).unwrap();
        drop(again);
    }

    #[test]
    fn test_thread_defaults_apply_while_live() {
        let _serial = serial();
        let config = RuntimeConfig::from_toml_str(
            "[threads]\nname_prefix = \"soak\"\nstack_size = 131072\n",
        )
        .unwrap();
        let guard = init(&config).unwrap();

        let thread = ThreadBuilder::new().spawn(|| 0).unwrap();
        let name = thread.name().map(str::to_string);
        thread.join(Timeout::Infinite).unwrap();
        assert_eq!(name, Some(format!("soak-{}", thread.id())));

        drop(guard);
        let thread = ThreadBuilder::new().spawn(|| 0).unwrap();
        assert_eq!(thread.name(), None);
        thread.join(Timeout::Infinite).unwrap();
    }

    #[test]
    fn test_invalid_config_leaves_runtime_down() {
        let _serial = serial();
        let mut config = RuntimeConfig::default();
        config.logging.level = "chatty".to_string();

        let err = init(&config).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
        assert!(!create_callback_installed());

        drop(init(&RuntimeConfig::default()).unwrap());
    }

    #[test]
    fn test_init_from_file() {
        let _serial = serial();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"full\"").unwrap();

        let guard = init_from_file(file.path()).unwrap();
        assert!(create_callback_installed());
        drop(guard);
    }

    #[test]
    fn test_c_abi_init_shutdown() {
        let _serial = serial();
        platsync_runtime_shutdown();

        assert_eq!(platsync_runtime_init(), ResultCode::Success);
        assert_eq!(platsync_runtime_init(), ResultCode::Failure);
        platsync_runtime_shutdown();
        assert!(!create_callback_installed());
        platsync_runtime_shutdown();
    }
}
