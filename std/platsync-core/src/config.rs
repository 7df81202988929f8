///
/// # Runtime Configuration
///
/// Defaults applied by the runtime when it creates threads and installs
/// logging. Hosts either build a `RuntimeConfig` in code or load it from a
/// `platsync.toml` file. Every field is optional; a missing table falls back
/// to `Default`.
///
/// ## Example platsync.toml
///
/// ```toml
/// [threads]
/// stack_size = 262144
/// name_prefix = "worker"
/// priority = "normal"
///
/// [logging]
/// level = "debug"
/// format = "compact"
/// filter = "platsync_threads=trace"
/// ```
///

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

pub const MIN_STACK_SIZE: usize = 16 * 1024;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Scheduling hint for a thread, mapped linearly onto the native range
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPriority {
    Lowest = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Highest = 4,
}

impl ThreadPriority {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ThreadPriority::Lowest),
            1 => Some(ThreadPriority::Low),
            2 => Some(ThreadPriority::Normal),
            3 => Some(ThreadPriority::High),
            4 => Some(ThreadPriority::Highest),
            _ => None,
        }
    }

    /// Position of this level in `[min, max]`, spread evenly from Lowest to Highest.
    pub fn scale(self, min: i32, max: i32) -> i32 {
        let level = self as i32;
        let highest = ThreadPriority::Highest as i32;
        min + level * (max - min) / highest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadDefaults {
    pub stack_size: Option<usize>,
    pub name_prefix: Option<String>,
    pub priority: ThreadPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Filter directive handed to the subscriber: the explicit filter when set,
    /// otherwise the bare level.
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(filter) if !filter.is_empty() => format!("{},{}", self.level, filter),
            _ => self.level.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub threads: ThreadDefaults,
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&content).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        tracing::debug!(path = %path.display(), "loaded runtime config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate(&PathBuf::from("<inline>"))?;
        Ok(config)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: String| SyncError::Config {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(size) = self.threads.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(invalid(format!(
                    "threads.stack_size must be at least {} bytes, got {}",
                    MIN_STACK_SIZE, size
                )));
            }
        }

        if let Some(prefix) = &self.threads.name_prefix {
            if prefix.contains('\0') {
                return Err(invalid("threads.name_prefix must not contain NUL".to_string()));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }

        Ok(())
    }
}
