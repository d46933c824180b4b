//! Owner-facing download API.
//!
//! A [`Downloader`] holds the shared pieces (configuration, transport, free
//! space probe and the [`AdmissionGate`]) and turns each [`DownloadRequest`]
//! into a running download. The returned [`DownloadHandle`] is the only
//! thing callers keep: it reports progress, cancels, and waits for the single
//! terminal report.
//!
//! # Example
//!
//! ```no_run
//! use chunkstream_core::download::{DownloadConfig, DownloadRequest, Downloader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(DownloadConfig::default())?;
//! let handle = downloader.download(DownloadRequest::new(
//!     "https://example.com/data.bin",
//!     "downloads/data.bin",
//! ));
//! let report = handle.wait().await;
//! println!("{} ({} bytes)", report.status, report.bytes_received);
//! # Ok(())
//! # }
//! ```

mod task;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::instrument;

use self::task::{DownloadTask, TaskContext};
use super::gate::{AdmissionGate, GateMember};
use super::transport::{HttpTransport, ReqwestTransport};
use super::writer::{FreeSpaceProbe, SystemFreeSpace};
use super::{ConfigError, DownloadConfig, DownloadReport, DownloaderError, WriteError};

/// What to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Absolute http(s) URL.
    pub url: String,
    /// Final location of the file.
    pub save_path: PathBuf,
    /// Optional `Content-Type` request header.
    pub content_type: Option<String>,
}

impl DownloadRequest {
    #[must_use]
    pub fn new(url: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            save_path: save_path.into(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Notification delivered through [`DownloadHandle::take_events`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadEvent {
    /// Non-terminal update.
    Progress(DownloadReport),
    /// The terminal report; sent exactly once, never after a shutdown.
    Finished(DownloadReport),
}

/// Starts downloads that share one configuration, transport and gate.
pub struct Downloader {
    config: DownloadConfig,
    transport: Arc<dyn HttpTransport>,
    gate: Arc<AdmissionGate>,
    probe: Arc<dyn FreeSpaceProbe>,
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader backed by a reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`DownloaderError::Config`] if `config` fails
    /// [`DownloadConfig::validate`], or [`DownloaderError::Transport`] if the
    /// HTTP client cannot be built.
    pub fn new(config: DownloadConfig) -> Result<Self, DownloaderError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.connect_timeout, config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport))?)
    }

    /// Creates a downloader over any transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails [`DownloadConfig::validate`].
    pub fn with_transport(
        config: DownloadConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = Arc::new(AdmissionGate::new(config.max_concurrent_downloads));
        Ok(Self {
            config,
            transport,
            gate,
            probe: Arc::new(SystemFreeSpace),
        })
    }

    /// Replaces the free space check used before every chunk write.
    #[must_use]
    pub fn with_free_space_probe(mut self, probe: Arc<dyn FreeSpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Shares an admission gate with other downloaders.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<AdmissionGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Registers a download with the gate and starts it if a slot is free.
    ///
    /// A download without a slot reports
    /// [`DownloadStatus::WaitingForOtherDownload`](super::DownloadStatus::WaitingForOtherDownload)
    /// and starts when an earlier one finishes.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub fn download(&self, request: DownloadRequest) -> DownloadHandle {
        let temp_path = self.config.layout.temp_path_for(&request.save_path);
        let task = DownloadTask::new(
            request,
            temp_path,
            TaskContext {
                config: &self.config,
                transport: Arc::clone(&self.transport),
                gate: Arc::clone(&self.gate),
                probe: Arc::clone(&self.probe),
                runtime: Handle::current(),
            },
        );
        self.gate.register(task.member());
        task.activate();
        DownloadHandle { task }
    }
}

/// Caller's side of one download. Dropping every clone shuts the download
/// down silently.
#[derive(Clone)]
pub struct DownloadHandle {
    task: Arc<DownloadTask>,
}

impl fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("url", &self.task.url())
            .field("save_path", &self.task.save_path())
            .field("report", &self.report())
            .finish()
    }
}

impl DownloadHandle {
    /// Cancels the download; the terminal report carries
    /// [`DownloadStatus::UserCancelled`](super::DownloadStatus::UserCancelled).
    pub fn cancel(&self) {
        self.task.session().cancel();
    }

    /// Stops the download and deletes its temp file without a terminal report.
    pub fn shutdown(&self) {
        self.task.shutdown();
    }

    /// Latest published report.
    #[must_use]
    pub fn report(&self) -> DownloadReport {
        self.task.report()
    }

    #[must_use]
    pub fn progress(&self) -> f32 {
        self.report().progress
    }

    /// Returns true once the terminal report has been published.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.task.is_complete()
    }

    #[must_use]
    pub fn was_canceled(&self) -> bool {
        self.task.session().is_canceled()
    }

    /// Returns true while the download holds an admission slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }

    /// Waits for the terminal report. After a shutdown this returns the last
    /// report published before it.
    pub async fn wait(&self) -> DownloadReport {
        let mut updates = self.task.subscribe();
        let task = &self.task;
        match updates
            .wait_for(|report| report.status.is_terminal() || task.is_shut_down())
            .await
        {
            Ok(report) => *report,
            Err(_) => task.report(),
        }
    }

    /// Starts a fresh event subscription, replacing any earlier one.
    ///
    /// Updates published before the call are not replayed, except the
    /// terminal report of a download that has already finished.
    #[must_use]
    pub fn take_events(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        self.task.take_events()
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.task.url()
    }

    #[must_use]
    pub fn save_path(&self) -> &Path {
        self.task.save_path()
    }

    /// Where bytes are staged until the download succeeds.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.task.temp_path()
    }
}

/// Reads a finished download as UTF-8 text.
///
/// # Errors
///
/// Returns [`WriteError::Io`] if the file cannot be read or is not UTF-8.
pub fn load_file_to_string(path: impl AsRef<Path>) -> Result<String, WriteError> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| WriteError::io(path, source))
}
