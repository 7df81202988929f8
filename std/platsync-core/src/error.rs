///
/// Result codes and error types.
///
/// `ResultCode` is the value surfaced across the C ABI. `SyncError` is the
/// error half of every fallible operation in the Rust API; each variant maps
/// onto exactly one `ResultCode` so a host can branch on the same values
/// whichever side of the boundary it sits on.
///
/// Timeouts are an expected outcome of blocking waits and always have their
/// own code, distinct from generic failure.
///

use std::path::PathBuf;
use thiserror::Error;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultCode {
    #[default]
    Success = 0,
    Failure = 1,
    InvalidParameter = 2,
    Timeout = 3,
    MemoryAllocationFailure = 4,
    ObjectDestroyed = 5,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    /// Decode a raw code received over the C ABI. Unknown values are failures.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ResultCode::Success,
            2 => ResultCode::InvalidParameter,
            3 => ResultCode::Timeout,
            4 => ResultCode::MemoryAllocationFailure,
            5 => ResultCode::ObjectDestroyed,
            _ => ResultCode::Failure,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultCode::Success => "success",
            ResultCode::Failure => "failure",
            ResultCode::InvalidParameter => "invalid parameter",
            ResultCode::Timeout => "timeout",
            ResultCode::MemoryAllocationFailure => "memory allocation failure",
            ResultCode::ObjectDestroyed => "object destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Operation failed: {0}")]
    Failure(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("Timed out")]
    Timeout,

    #[error("Memory allocation failed")]
    MemoryAllocationFailure,

    #[error("Object was destroyed while in use")]
    Destroyed,

    #[error("Thread entry point panicked")]
    ThreadPanicked,

    #[error("Invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncError {
    pub fn code(&self) -> ResultCode {
        match self {
            SyncError::Timeout => ResultCode::Timeout,
            SyncError::InvalidParameter(_) => ResultCode::InvalidParameter,
            SyncError::MemoryAllocationFailure => ResultCode::MemoryAllocationFailure,
            SyncError::Destroyed => ResultCode::ObjectDestroyed,
            SyncError::Failure(_)
            | SyncError::ThreadPanicked
            | SyncError::Config { .. }
            | SyncError::Io(_)
            | SyncError::Toml(_) => ResultCode::Failure,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Collapse a unit result into the code handed back over the C ABI.
pub fn result_code(result: &Result<()>) -> ResultCode {
    match result {
        Ok(()) => ResultCode::Success,
        Err(err) => err.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        assert_eq!(SyncError::Timeout.code(), ResultCode::Timeout);
        assert_ne!(SyncError::Timeout.code(), ResultCode::Failure);
        assert!(SyncError::Timeout.is_timeout());
        assert!(!SyncError::Failure("boom".to_string()).is_timeout());
    }

    #[test]
    fn test_raw_round_trip() {
        for code in [
            ResultCode::Success,
            ResultCode::Failure,
            ResultCode::InvalidParameter,
            ResultCode::Timeout,
            ResultCode::MemoryAllocationFailure,
            ResultCode::ObjectDestroyed,
        ] {
            assert_eq!(ResultCode::from_raw(code.as_raw()), code);
        }
        assert_eq!(ResultCode::from_raw(99), ResultCode::Failure);
        assert_eq!(ResultCode::from_raw(-1), ResultCode::Failure);
    }

    #[test]
    fn test_error_display_messages() {
        let err = SyncError::InvalidParameter("thread handle is null");
        assert!(err.to_string().contains("Invalid parameter"));
        assert!(err.to_string().contains("thread handle is null"));

        let err = SyncError::Config {
            path: PathBuf::from("/tmp/platsync.toml"),
            reason: "stack_size must be non-zero".to_string(),
        };
        assert!(err.to_string().contains("/tmp/platsync.toml"));
        assert!(err.to_string().contains("stack_size"));
        assert_eq!(err.code(), ResultCode::Failure);

        assert_eq!(SyncError::Destroyed.code(), ResultCode::ObjectDestroyed);
        assert_eq!(
            SyncError::MemoryAllocationFailure.code(),
            ResultCode::MemoryAllocationFailure
        );
    }

    #[test]
    fn test_result_code_helper() {
        assert_eq!(result_code(&Ok(())), ResultCode::Success);
        assert_eq!(result_code(&Err(SyncError::Timeout)), ResultCode::Timeout);
    }
}
