//! Download status taxonomy and the report carried by every notification.

use serde::Serialize;

/// Status of a download as surfaced to the caller.
///
/// Progress notifications carry [`DownloadStatus::InProgress`] (or
/// [`DownloadStatus::WaitingForOtherDownload`] while queued); the single
/// terminal notification carries one of the terminal variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Nothing has happened yet.
    #[default]
    None,
    /// HTTP status code outside the accepted set (200, 201, 206).
    InvalidStatusCode,
    /// A planned chunk range was not sensible.
    ValidationFailed,
    /// Opening, writing or relocating a file failed.
    FileSystemError,
    /// Chunk retries were exhausted.
    NetworkError,
    /// The size-discovery request produced no usable response.
    InvalidResponse,
    /// Free space on the target volume is below what the next chunk needs.
    InsufficientDiskSpace,
    /// The caller cancelled the download.
    UserCancelled,
    /// The admission gate is full; the download is parked until a slot frees.
    WaitingForOtherDownload,
    /// Bytes are being transferred.
    InProgress,
    /// The file was downloaded and moved to its final path.
    Success,
}

impl DownloadStatus {
    /// Returns true for statuses that end a download.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Self::None | Self::WaitingForOtherDownload | Self::InProgress
        )
    }

    /// Returns true only for [`DownloadStatus::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Returns the stable label used in logs and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::InvalidStatusCode => "invalid_status_code",
            Self::ValidationFailed => "validation_failed",
            Self::FileSystemError => "file_system_error",
            Self::NetworkError => "network_error",
            Self::InvalidResponse => "invalid_response",
            Self::InsufficientDiskSpace => "insufficient_disk_space",
            Self::UserCancelled => "user_cancelled",
            Self::WaitingForOtherDownload => "waiting_for_other_download",
            Self::InProgress => "in_progress",
            Self::Success => "success",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot delivered with progress and terminal notifications.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DownloadReport {
    /// Fraction of the file received, 0.0 to 1.0 (0.0 while the size is unknown).
    pub progress: f32,
    /// Bytes received so far, counted from the start of the file.
    pub bytes_received: u64,
    /// Last HTTP status code seen (0 before any response).
    pub http_status: u16,
    /// Current status.
    pub status: DownloadStatus,
}
