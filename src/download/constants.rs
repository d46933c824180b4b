//! Constants for the download module (chunk sizing, timeouts, disk handling).

use std::time::Duration;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Chunk sizes are aligned down to this boundary.
pub const CHUNK_ALIGNMENT: u64 = 4096;

/// Default maximum chunk size in MiB.
pub const DEFAULT_MAX_CHUNK_SIZE_MB: i64 = 100;

/// Largest accepted chunk size in MiB (exclusive).
pub const MAX_CHUNK_SIZE_MB: i64 = 1024;

/// Extra capacity reserved in each chunk buffer for servers that over-deliver.
pub const CHUNK_BUFFER_PADDING: usize = 4 * 4096;

/// Default number of downloads allowed to fetch at once.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Upper clamp for concurrent downloads.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 1000;

/// Default time without received bytes before a chunk request counts as stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(14);

/// Default period of the stall check.
pub const DEFAULT_STALL_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Free space required on top of the chunk end offset before a write.
pub const DISK_SPACE_MARGIN: u64 = MIB;

/// Attempts made to move the finished temp file into place.
pub const RELOCATE_ATTEMPTS: u32 = 6;

/// Pause between relocation attempts.
pub const RELOCATE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Poll period while the completion path waits for pending writes.
pub const PENDING_WRITE_POLL: Duration = Duration::from_millis(50);
