//! Archive configuration.
//!
//! Serde-derived so a host application can embed it in its own configuration
//! file; durations use humantime syntax (`"1s"`, `"250ms"`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_FLUSH_INTERVAL;
use crate::error::ArchiveError;

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

/// Configuration of one archive database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Database file path; the parent directory is created on open.
    pub path: PathBuf,

    /// Write-behind flush interval (default: 1s).
    ///
    /// Also the compaction granularity of activity report history: between
    /// two flushes only the latest report of an occurrence becomes durable.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl ArchiveConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ArchiveConfig {
            path: path.into(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Override the flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.path.as_os_str().is_empty() {
            return Err(ArchiveError::InvalidData(
                "archive path must not be empty".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ArchiveError::InvalidData(
                "flush_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
