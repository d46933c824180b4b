//! CLI output formatting.

use std::path::Path;

use anyhow::Result;
use chunkstream_core::{DownloadReport, DownloadStatus};
use serde::Serialize;

/// Message when no targets were given.
pub(crate) const NO_INPUT_GUIDANCE: &str = "No downloads requested. Pass URL=PATH or URL targets.";

/// Example invocation shown with [`NO_INPUT_GUIDANCE`].
pub(crate) const INPUT_ARG_EXAMPLE: &str =
    "Example: chunkstream https://example.com/data.bin=data.bin";

/// One finished download, as printed with `--json`.
#[derive(Debug, Serialize)]
pub(crate) struct DownloadSummary<'a> {
    pub(crate) url: &'a str,
    pub(crate) path: &'a Path,
    pub(crate) status: DownloadStatus,
    pub(crate) http_status: u16,
    pub(crate) bytes_received: u64,
    pub(crate) progress: f32,
}

impl<'a> DownloadSummary<'a> {
    pub(crate) fn new(url: &'a str, path: &'a Path, report: DownloadReport) -> Self {
        Self {
            url,
            path,
            status: report.status,
            http_status: report.http_status,
            bytes_received: report.bytes_received,
            progress: report.progress,
        }
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn to_text(&self) -> String {
        let mark = if self.status.is_success() { "ok" } else { "FAILED" };
        let mut line = format!(
            "{mark:<6} {} ({} bytes) <- {}",
            self.path.display(),
            self.bytes_received,
            self.url
        );
        if !self.status.is_success() {
            line.push_str(&format!(" [{}", self.status));
            if self.http_status != 0 {
                line.push_str(&format!(", HTTP {}", self.http_status));
            }
            line.push(']');
        }
        line
    }
}
