///
/// Soak harness error types.
///
/// A scenario either trips one of its checks (`Check`) or hits a runtime
/// error it did not expect while setting up (`Runtime`).
///

use platsync_runtime::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoakError {
    #[error("{scenario}: {reason}")]
    Check {
        scenario: &'static str,
        reason: String,
    },

    #[error("{scenario}: gave up waiting for {what}")]
    Stalled {
        scenario: &'static str,
        what: &'static str,
    },

    #[error("Runtime error: {0}")]
    Runtime(#[from] SyncError),
}

impl SoakError {
    pub fn check(scenario: &'static str, reason: impl Into<String>) -> Self {
        SoakError::Check {
            scenario,
            reason: reason.into(),
        }
    }
}
