//! Error types for the download module.
//!
//! Transport and disk failures are kept as structured errors with the context
//! needed for logs; the session maps them onto [`DownloadStatus`] values when
//! they end a download.

use std::path::PathBuf;

use thiserror::Error;

use super::DownloadStatus;

/// Errors raised by an [`HttpTransport`](super::HttpTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The response body stream broke off mid-transfer.
    #[error("body stream for {url} interrupted: {message}")]
    Interrupted {
        /// The URL being streamed.
        url: String,
        /// Description of the interruption.
        message: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Build {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a body interruption error.
    pub fn interrupted(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interrupted {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Errors raised by the [`DiskWriter`](super::DiskWriter).
#[derive(Debug, Error)]
pub enum WriteError {
    /// Creating the parent directory of a file failed.
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// File system error while opening, writing, flushing or moving a file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A chunk arrived while no file was open.
    #[error("no open file for chunk [{start}-{end}]")]
    NotOpen {
        /// First byte of the rejected chunk.
        start: u64,
        /// Last byte of the rejected chunk.
        end: u64,
    },

    /// The target volume does not have room for the chunk.
    #[error("insufficient disk space at {path}: required {required} bytes, available {available}")]
    InsufficientSpace {
        /// Path whose volume was checked.
        path: PathBuf,
        /// Bytes required (chunk end offset plus safety margin).
        required: u64,
        /// Bytes available.
        available: u64,
    },

    /// Moving the temp file to its destination kept failing.
    #[error("failed to move {from} to {to} after {attempts} attempts")]
    Relocate {
        /// Temp file path.
        from: PathBuf,
        /// Final destination path.
        to: PathBuf,
        /// Number of attempts made.
        attempts: u32,
    },
}

impl WriteError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps the error onto the status reported to the caller.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        match self {
            Self::InsufficientSpace { .. } => DownloadStatus::InsufficientDiskSpace,
            Self::CreateDir { .. } | Self::Io { .. } | Self::NotOpen { .. } | Self::Relocate { .. } => {
                DownloadStatus::FileSystemError
            }
        }
    }
}

/// Invalid operator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value fell outside its accepted range.
    #[error("invalid value {value} for `{key}`: expected {expected}")]
    OutOfRange {
        /// Configuration key.
        key: &'static str,
        /// Offending value as written.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

/// Errors raised while building a [`Downloader`](super::Downloader).
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// The configuration failed validation.
    #[error("invalid download configuration: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
