//! Chunkstream Core Library
//!
//! Memory-bounded HTTP file downloads. Files are fetched in fixed-size
//! chunks, staged in a temp file and moved into place only when complete.
//! A shared admission gate caps how many downloads fetch at once.
//!
//! # Architecture
//!
//! - [`download`] - sessions, chunk planning, disk writer and admission gate

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use download::{
    AdmissionGate, DownloadConfig, DownloadEvent, DownloadHandle, DownloadReport,
    DownloadRequest, DownloadStatus, Downloader, DownloaderError, RetryPolicy,
    load_file_to_string,
};
