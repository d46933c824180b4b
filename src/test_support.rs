//! Scripted transport and recording observer for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::download::{
    BodyStream, ChunkBuffer, DownloadReport, GetResponse, HeadResponse, HttpTransport,
    SessionObserver, TransportError, TransportRequest,
};

/// Deterministic, non-repeating-looking file contents.
pub(crate) fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// How the transport answers one GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GetScript {
    /// Serve the requested range (or the whole body) with 200/206.
    Serve,
    /// Serve the whole body with 200, ignoring any range.
    IgnoreRange,
    /// Answer 206 for the requested length, but with bytes from offset 0.
    MisalignedRange,
    /// Fail before a response arrives.
    Fail,
    /// Answer with this status and an empty body.
    Status(u16),
    /// Answer 200 and never deliver a byte.
    Hang,
    /// Serve only this many bytes of the requested range, then close.
    Truncate(usize),
}

/// In-memory [`HttpTransport`] serving one body.
pub(crate) struct ScriptedTransport {
    body: Bytes,
    head_status: u16,
    head_fails: bool,
    advertise_length: bool,
    accept_ranges: bool,
    delivery_size: usize,
    default_script: GetScript,
    scripts: Mutex<VecDeque<GetScript>>,
    heads: AtomicUsize,
    gets: Mutex<Vec<(Instant, TransportRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body: Bytes::from(body),
            head_status: 200,
            head_fails: false,
            advertise_length: true,
            accept_ranges: true,
            delivery_size: 128,
            default_script: GetScript::Serve,
            scripts: Mutex::new(VecDeque::new()),
            heads: AtomicUsize::new(0),
            gets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_head_status(mut self, status: u16) -> Self {
        self.head_status = status;
        self
    }

    pub(crate) fn with_failing_head(mut self) -> Self {
        self.head_fails = true;
        self
    }

    pub(crate) fn without_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }

    pub(crate) fn without_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    pub(crate) fn with_delivery_size(mut self, size: usize) -> Self {
        self.delivery_size = size.max(1);
        self
    }

    pub(crate) fn with_default(mut self, script: GetScript) -> Self {
        self.default_script = script;
        self
    }

    /// Queues a script for the next unscripted GET.
    pub(crate) fn then(self, script: GetScript) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
        self
    }

    pub(crate) fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub(crate) fn get_requests(&self) -> Vec<TransportRequest> {
        self.gets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn get_times(&self) -> Vec<Instant> {
        self.gets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    fn slice_for(&self, request: &TransportRequest) -> (u16, Bytes) {
        match request.range {
            Some(range) => {
                let len = self.body.len() as u64;
                let start = range.start.min(len) as usize;
                let end = (range.end + 1).min(len) as usize;
                (206, self.body.slice(start..end))
            }
            None => (200, self.body.clone()),
        }
    }

    fn content_range(&self, start: u64, len: usize) -> HeaderValue {
        let end = (start + len as u64).saturating_sub(1);
        HeaderValue::from_str(&format!("bytes {start}-{end}/{}", self.body.len()))
            .unwrap_or_else(|_| HeaderValue::from_static("bytes */0"))
    }

    fn deliveries(&self, body: Bytes) -> Vec<Result<Bytes, TransportError>> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + self.delivery_size).min(body.len());
            out.push(Ok(body.slice(offset..end)));
            offset = end;
        }
        out
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn head(&self, request: &TransportRequest) -> Result<HeadResponse, TransportError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        if self.head_fails {
            return Err(TransportError::interrupted(request.url.clone(), "connection reset"));
        }
        let mut headers = HeaderMap::new();
        if self.advertise_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len() as u64));
        }
        if self.accept_ranges {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        Ok(HeadResponse {
            status: self.head_status,
            headers,
        })
    }

    async fn get(&self, request: &TransportRequest) -> Result<GetResponse, TransportError> {
        self.gets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), request.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.default_script);

        let mut headers = HeaderMap::new();
        let (status, body): (u16, BodyStream) = match script {
            GetScript::Fail => {
                return Err(TransportError::interrupted(request.url.clone(), "connection refused"));
            }
            GetScript::Status(status) => (status, stream::empty().boxed()),
            GetScript::Hang => (200, stream::pending().boxed()),
            GetScript::IgnoreRange => (200, stream::iter(self.deliveries(self.body.clone())).boxed()),
            GetScript::MisalignedRange => {
                let (status, bytes) = self.slice_for(request);
                let shifted = self.body.slice(..bytes.len());
                headers.insert(CONTENT_RANGE, self.content_range(0, shifted.len()));
                (status, stream::iter(self.deliveries(shifted)).boxed())
            }
            GetScript::Serve => {
                let (status, bytes) = self.slice_for(request);
                if let Some(range) = request.range {
                    headers.insert(CONTENT_RANGE, self.content_range(range.start, bytes.len()));
                }
                (status, stream::iter(self.deliveries(bytes)).boxed())
            }
            GetScript::Truncate(limit) => {
                let (status, bytes) = self.slice_for(request);
                if let Some(range) = request.range {
                    headers.insert(CONTENT_RANGE, self.content_range(range.start, bytes.len()));
                }
                let cut = bytes.slice(..limit.min(bytes.len()));
                (status, stream::iter(self.deliveries(cut)).boxed())
            }
        };
        Ok(GetResponse {
            status,
            headers,
            body,
        })
    }
}

/// Observer that keeps everything a session reports.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    progress: Mutex<Vec<DownloadReport>>,
    chunks: Mutex<Vec<(u64, u64)>>,
    file: Mutex<Vec<u8>>,
    completions: Mutex<Vec<DownloadReport>>,
    completed: Notify,
}

impl RecordingObserver {
    pub(crate) async fn wait_complete(&self) -> DownloadReport {
        loop {
            if let Some(report) = self.completions().first() {
                return *report;
            }
            self.completed.notified().await;
        }
    }

    pub(crate) fn completions(&self) -> Vec<DownloadReport> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn progress_reports(&self) -> Vec<DownloadReport> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn assembled(&self) -> Vec<u8> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn last_chunk_end(&self) -> Option<u64> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, end)| *end)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_progress(&self, report: DownloadReport) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    fn on_chunk_complete(&self, chunk: ChunkBuffer) {
        let start = chunk.start_offset() as usize;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if file.len() < start + chunk.len() {
            file.resize(start + chunk.len(), 0);
        }
        file[start..start + chunk.len()].copy_from_slice(chunk.data());
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((chunk.start_offset(), chunk.end_offset()));
    }

    fn on_complete(&self, report: DownloadReport) {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
        self.completed.notify_one();
    }
}
