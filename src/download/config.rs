//! Operator-tunable download settings.
//!
//! Out-of-range values are clamped or replaced by defaults when set through
//! the builder methods; [`DownloadConfig::validate`] reports the settings that
//! cannot be repaired that way.

use std::time::Duration;

use tracing::warn;

use super::constants::{
    CHUNK_ALIGNMENT, CHUNK_BUFFER_PADDING, CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CHUNK_SIZE_MB,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_STALL_CHECK_INTERVAL, DEFAULT_STALL_TIMEOUT,
    MAX_CHUNK_SIZE_MB, MAX_CONCURRENT_DOWNLOADS, MIB,
};
use super::error::ConfigError;
use super::retry::RetryPolicy;
use super::temp_path::TempLayout;

/// Converts a chunk size in MiB into bytes.
///
/// Values outside `[1, 1024)` fall back to the 100 MiB default. The result is
/// aligned down to a 4 KiB boundary.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn chunk_size_from_mb(megabytes: i64) -> u64 {
    let megabytes = if (1..MAX_CHUNK_SIZE_MB).contains(&megabytes) {
        megabytes
    } else {
        warn!(
            megabytes,
            default = DEFAULT_MAX_CHUNK_SIZE_MB,
            "max chunk size out of range, using default"
        );
        DEFAULT_MAX_CHUNK_SIZE_MB
    };
    let bytes = megabytes as u64 * MIB;
    bytes - bytes % CHUNK_ALIGNMENT
}

/// Clamps a concurrency limit to `[1, 1000]`.
#[must_use]
pub fn clamp_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENT_DOWNLOADS)
}

/// Settings shared by every download started from one [`Downloader`](super::Downloader).
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Largest byte count fetched by one chunk request.
    pub max_chunk_size: u64,
    /// Downloads allowed to fetch at the same time.
    pub max_concurrent_downloads: usize,
    /// Silence on an in-flight chunk request that counts as a stall.
    pub stall_timeout: Duration,
    /// How often the stall check runs.
    pub stall_check_interval: Duration,
    /// Retry budget and backoff shared by stalls and failed requests.
    pub retry: RetryPolicy,
    /// Spare capacity added to each chunk buffer.
    pub buffer_padding: usize,
    /// Whole-request timeout applied by the HTTP transport (`None` disables it).
    pub request_timeout: Option<Duration>,
    /// Connection establishment timeout applied by the HTTP transport.
    pub connect_timeout: Duration,
    /// Where temp files are placed.
    pub layout: TempLayout,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: chunk_size_from_mb(DEFAULT_MAX_CHUNK_SIZE_MB),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            stall_check_interval: DEFAULT_STALL_CHECK_INTERVAL,
            retry: RetryPolicy::default(),
            buffer_padding: CHUNK_BUFFER_PADDING,
            request_timeout: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            layout: TempLayout::default(),
        }
    }
}

impl DownloadConfig {
    /// Sets the chunk size from a MiB value (see [`chunk_size_from_mb`]).
    #[must_use]
    pub fn with_max_chunk_size_mb(mut self, megabytes: i64) -> Self {
        self.max_chunk_size = chunk_size_from_mb(megabytes);
        self
    }

    /// Sets the concurrency limit, clamped to `[1, 1000]`.
    #[must_use]
    pub fn with_max_concurrent_downloads(mut self, value: usize) -> Self {
        let clamped = clamp_concurrency(value);
        if clamped != value {
            warn!(requested = value, clamped, "max concurrent downloads clamped");
        }
        self.max_concurrent_downloads = clamped;
        self
    }

    /// Sets the stall timeout.
    #[must_use]
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Sets the stall check period.
    #[must_use]
    pub fn with_stall_check_interval(mut self, interval: Duration) -> Self {
        self.stall_check_interval = interval;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the temp file layout.
    #[must_use]
    pub fn with_layout(mut self, layout: TempLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request timeout. A zero duration disables it.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Checks the settings that builders cannot repair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size < MIB || self.max_chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_chunk_size",
                value: self.max_chunk_size.to_string(),
                expected: "a 4 KiB aligned size of at least 1 MiB",
            });
        }
        if !(1..=MAX_CONCURRENT_DOWNLOADS).contains(&self.max_concurrent_downloads) {
            return Err(ConfigError::OutOfRange {
                key: "max_concurrent_downloads",
                value: self.max_concurrent_downloads.to_string(),
                expected: "1..=1000",
            });
        }
        if self.stall_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "stall_timeout",
                value: "0".to_string(),
                expected: "a positive duration",
            });
        }
        if self.stall_check_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "stall_check_interval",
                value: "0".to_string(),
                expected: "a positive duration",
            });
        }
        Ok(())
    }
}
