//! Chunked HTTP downloads streamed to disk.
//!
//! A download is probed with HEAD, then fetched in bounded chunks (byte
//! ranges when the server supports them, one streamed GET otherwise). Each
//! finished chunk is written at its offset in a temp file, which moves to the
//! requested location only when the whole transfer succeeded.
//!
//! # Features
//!
//! - Bounded memory per download (one chunk buffer at a time)
//! - Stall detection with per-chunk retries and exponential backoff
//! - Free space checked before every chunk write
//! - Process-wide cap on concurrently fetching downloads
//! - One terminal report per download, no report after a silent shutdown
//!
//! See [`Downloader`] for an example.

pub mod constants;

mod chunk;
mod config;
mod engine;
mod error;
mod gate;
mod headers;
mod retry;
mod session;
mod status;
mod temp_path;
mod transport;
mod writer;

pub use chunk::{ChunkBuffer, ChunkOutcome};
pub use config::{DownloadConfig, chunk_size_from_mb, clamp_concurrency};
pub use engine::{DownloadEvent, DownloadHandle, DownloadRequest, Downloader, load_file_to_string};
pub use error::{ConfigError, DownloaderError, TransportError, WriteError};
pub use gate::{AdmissionGate, GateMember};
pub use headers::{
    ACCEPTED_STATUS_CODES, accepts_ranges, content_length, content_range_start,
    has_content_encoding, is_accepted_status,
};
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
pub use session::{DownloadSession, SessionObserver, SessionPhase, SessionSettings};
pub use status::{DownloadReport, DownloadStatus};
pub use temp_path::TempLayout;
pub use transport::{
    BodyStream, ByteRange, GetResponse, HeadResponse, HttpTransport, ReqwestTransport,
    TransportRequest,
};
pub use writer::{DiskWriter, FreeSpaceProbe, SystemFreeSpace};

// No module-local Result aliases: signatures spell out `Result<T, E>`.
