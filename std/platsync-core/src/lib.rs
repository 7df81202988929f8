//!
//! platsync-core - Core Runtime Types
//!
//! This crate provides the fundamental types shared across all platsync crates:
//!
//! - `ResultCode` for the C ABI and `SyncError` for the Rust API
//! - `Timeout` with the `WAIT_INFINITE` millisecond sentinel
//! - `RefCount` for reference-counted handles that can be torn down while
//!   other threads still observe them
//! - `RuntimeConfig` for thread and logging defaults
//!
//! All reference counts are atomic. Timeouts are expressed in milliseconds and
//! turned into deadlines on the monotonic clock at the moment of the call.
//!

pub mod config;
pub mod error;
pub mod refcount;
pub mod timeout;

pub use config::*;
pub use error::*;
pub use refcount::*;
pub use timeout::*;
