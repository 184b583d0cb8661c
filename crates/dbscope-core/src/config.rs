//! Engine tuning knobs.
//!
//! All thresholds the catalog, search and export paths depend on live in
//! [`EngineConfig`]. Defaults match the behaviour investigators are used to;
//! tests shrink the timeouts to keep lock-contention cases fast.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every engine component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EngineConfig {
    /// Tables with at most this many rows are snapshotted in memory at load.
    pub cache_row_threshold: u64,
    /// Rows per table examined by a regex search.
    pub regex_row_cap: usize,
    /// Plain search runs the fallback scan when the index yields fewer hits.
    pub fallback_threshold: usize,
    /// Maximum rows returned per column by a fallback or byte-pattern query.
    pub fallback_column_limit: usize,
    /// Blobs must be strictly larger than this to be classified for export.
    pub attachment_min_bytes: usize,
    /// Busy wait applied to the first connection attempt.
    pub busy_timeout: Duration,
    /// Busy wait applied to the retry connection.
    pub retry_busy_timeout: Duration,
    /// Pause before the single retry after a locked-database error.
    pub lock_retry_delay: Duration,
    /// Cells whose rendered text exceeds this many bytes are shown as a placeholder.
    pub display_limit_bytes: usize,
}

impl EngineConfig {
    pub const DEFAULT_CACHE_ROW_THRESHOLD: u64 = 1000;
    pub const DEFAULT_REGEX_ROW_CAP: usize = 10_000;
    pub const DEFAULT_FALLBACK_THRESHOLD: usize = 100;
    pub const DEFAULT_FALLBACK_COLUMN_LIMIT: usize = 100;
    pub const DEFAULT_ATTACHMENT_MIN_BYTES: usize = 150;
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_RETRY_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_DISPLAY_LIMIT_BYTES: usize = 2000;

    /// Load a configuration from a JSON document. Missing fields use defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_row_threshold: Self::DEFAULT_CACHE_ROW_THRESHOLD,
            regex_row_cap: Self::DEFAULT_REGEX_ROW_CAP,
            fallback_threshold: Self::DEFAULT_FALLBACK_THRESHOLD,
            fallback_column_limit: Self::DEFAULT_FALLBACK_COLUMN_LIMIT,
            attachment_min_bytes: Self::DEFAULT_ATTACHMENT_MIN_BYTES,
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
            retry_busy_timeout: Self::DEFAULT_RETRY_BUSY_TIMEOUT,
            lock_retry_delay: Self::DEFAULT_LOCK_RETRY_DELAY,
            display_limit_bytes: Self::DEFAULT_DISPLAY_LIMIT_BYTES,
        }
    }
}
