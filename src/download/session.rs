//! The per-file download state machine.
//!
//! A session discovers the file size with a HEAD request, then fetches the
//! file one chunk at a time, handing every completed chunk to its
//! [`SessionObserver`]. A periodic stall check and failed requests share one
//! retry budget per chunk. Every way a session can end goes through a single
//! termination path, so the observer sees at most one completion.
//!
//! Background tasks only hold weak references to the session; once the last
//! [`DownloadSession`] handle is gone they stop at their next step.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::chunk::{ChunkBuffer, ChunkOutcome};
use super::config::DownloadConfig;
use super::error::TransportError;
use super::headers::{accepts_ranges, content_length, content_range_start, is_accepted_status};
use super::retry::{RetryDecision, RetryPolicy};
use super::transport::{ByteRange, HeadResponse, HttpTransport, TransportRequest};
use super::{DownloadReport, DownloadStatus};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, not yet started (possibly waiting for admission).
    Idle,
    /// HEAD request in flight.
    DiscoveringSize,
    /// Choosing the next range.
    PlanningChunk,
    /// Chunk request in flight.
    FetchingChunk,
    /// Passing a completed chunk to the observer.
    HandingOff,
    /// The in-flight request went silent and is being canceled.
    Stalled,
    /// Waiting out a backoff delay.
    Retrying,
    /// All data received.
    Completed,
    /// Canceled by the caller or shut down.
    Canceled,
    /// Ended with an error.
    Failed,
}

impl SessionPhase {
    /// Returns true once the session has ended.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

/// Receives everything a session produces.
pub trait SessionObserver: Send + Sync {
    /// Called after every body delivery.
    fn on_progress(&self, report: DownloadReport);

    /// Called with each completed chunk, in offset order.
    fn on_chunk_complete(&self, chunk: ChunkBuffer);

    /// Called once when the session ends, unless it was shut down.
    fn on_complete(&self, report: DownloadReport);
}

/// Tuning used by one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Largest range fetched by one request.
    pub max_chunk_size: u64,
    /// Spare capacity per chunk buffer.
    pub buffer_padding: usize,
    /// Silence that counts as a stall.
    pub stall_timeout: Duration,
    /// Stall check period.
    pub stall_check_interval: Duration,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
}

/// Shortest stall check period a session runs with.
const MIN_STALL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

impl SessionSettings {
    /// Raises a zero chunk size or check period to the smallest usable value.
    fn usable(mut self) -> Self {
        self.max_chunk_size = self.max_chunk_size.max(1);
        self.stall_check_interval = self.stall_check_interval.max(MIN_STALL_CHECK_INTERVAL);
        self
    }
}

impl From<&DownloadConfig> for SessionSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            buffer_padding: config.buffer_padding,
            stall_timeout: config.stall_timeout,
            stall_check_interval: config.stall_check_interval,
            retry: config.retry.clone(),
        }
    }
}

/// Handle to a download session. Clones share the same session.
#[derive(Clone)]
pub struct DownloadSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for DownloadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSession")
            .field("url", &self.inner.request.url)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl DownloadSession {
    /// Creates an idle session for `request`.
    pub fn new(
        request: TransportRequest,
        settings: SessionSettings,
        transport: Arc<dyn HttpTransport>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                request: request.with_range(None),
                settings: settings.usable(),
                transport,
                observer,
                phase: Mutex::new(SessionPhase::Idle),
                plan: Mutex::new(ChunkPlan::default()),
                active_chunk: Mutex::new(None),
                chunk_offset: AtomicUsize::new(0),
                bytes_received: AtomicU64::new(0),
                last_data_at: Mutex::new(Instant::now()),
                status_code: AtomicU16::new(0),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        }
    }

    /// Starts size discovery and the stall check. Must run inside a tokio runtime.
    ///
    /// Calling it on a session that already left [`SessionPhase::Idle`] does nothing.
    #[instrument(skip(self), fields(url = %self.inner.request.url))]
    pub fn begin(&self) {
        {
            let mut phase = self.inner.lock_phase();
            if *phase != SessionPhase::Idle {
                debug!(phase = ?*phase, "session already started");
                return;
            }
            *phase = SessionPhase::DiscoveringSize;
        }
        debug!("session starting");

        let weak = Arc::downgrade(&self.inner);
        let driver = tokio::spawn(drive(weak.clone()));
        let stall = tokio::spawn(monitor_stalls(
            weak,
            self.inner.settings.stall_check_interval,
        ));

        let mut tasks = self.inner.lock_tasks();
        if tasks.closed {
            driver.abort();
            stall.abort();
            return;
        }
        tasks.driver = Some(driver.abort_handle());
        tasks.stall = Some(stall.abort_handle());
    }

    /// Cancels the session and reports [`DownloadStatus::UserCancelled`].
    /// Further calls are no-ops.
    pub fn cancel(&self) {
        self.inner
            .terminate(DownloadStatus::UserCancelled, "canceled by caller", true);
    }

    /// Stops the session without notifying the observer.
    pub fn shutdown(&self) {
        self.inner
            .terminate(DownloadStatus::UserCancelled, "shut down", false);
    }

    /// Ends the session with `status`, e.g. after a disk failure.
    pub fn fail(&self, status: DownloadStatus, message: &str) {
        self.inner.terminate(status, message, true);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.inner.lock_phase()
    }

    /// Last HTTP status code received, 0 before any response.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.inner.status_code.load(Ordering::SeqCst)
    }

    /// Returns true once [`begin`](Self::begin) ran or the session ended.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.phase() != SessionPhase::Idle
    }

    /// Returns true if the session was canceled or shut down.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.phase() == SessionPhase::Canceled
    }

    /// Returns true once the session has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase().is_finished()
    }

    /// Total file size, once discovered.
    #[must_use]
    pub fn total_size(&self) -> Option<u64> {
        self.inner.lock_plan().total_size
    }

    /// Returns true when chunks are fetched with range requests.
    #[must_use]
    pub fn uses_ranges(&self) -> bool {
        self.inner.lock_plan().uses_ranges
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.request.url
    }

    /// Snapshot carrying `status`.
    #[must_use]
    pub fn report(&self, status: DownloadStatus) -> DownloadReport {
        self.inner.report(status)
    }
}

/// Range planning state, guarded by one lock.
#[derive(Debug, Default)]
struct ChunkPlan {
    total_size: Option<u64>,
    next_offset: u64,
    last_outcome: Option<ChunkOutcome>,
    accepts_ranges: bool,
    uses_ranges: bool,
    retry_count: u32,
}

enum NextRange {
    Range(ByteRange),
    Finished,
    Invalid,
}

/// What a finished request leads to.
enum Continuation {
    NextChunk,
    Retry(&'static str),
    Done { complete: bool },
}

impl ChunkPlan {
    fn next_range(&self, max_chunk_size: u64) -> NextRange {
        let start = self.next_offset;
        match self.total_size {
            Some(total) if start >= total => NextRange::Finished,
            Some(total) => NextRange::Range(ByteRange {
                start,
                end: start.saturating_add(max_chunk_size).min(total) - 1,
            }),
            None => match start.checked_add(max_chunk_size) {
                Some(end) => NextRange::Range(ByteRange { start, end }),
                None => NextRange::Invalid,
            },
        }
    }

    fn record_handoff(&mut self, chunk: &ChunkBuffer, outcome: ChunkOutcome) {
        self.next_offset = chunk.end_offset() + 1;
        self.last_outcome = Some(outcome);
        // Without ranges the whole body is one attempt, so the budget spans it.
        if self.uses_ranges {
            self.retry_count = 0;
        }
    }

    fn restart(&mut self) {
        self.next_offset = 0;
        self.last_outcome = None;
    }

    fn after_request(&self) -> Continuation {
        let Some(total) = self.total_size else {
            // An unknown-size body arrives as one stream; its close is end of file.
            return Continuation::Done { complete: true };
        };
        if self.next_offset >= total {
            return Continuation::Done { complete: true };
        }
        match self.last_outcome {
            Some(ChunkOutcome::Empty) => Continuation::Retry("response carried no data"),
            Some(ChunkOutcome::EndedEarly) => Continuation::Done { complete: false },
            _ if self.uses_ranges => Continuation::NextChunk,
            _ => Continuation::Retry("stream closed before the advertised size"),
        }
    }
}

#[derive(Debug, Default)]
struct SessionTasks {
    driver: Option<AbortHandle>,
    request: Option<AbortHandle>,
    stall: Option<AbortHandle>,
    closed: bool,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        self.closed = true;
        for handle in [self.request.take(), self.stall.take(), self.driver.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

enum Step {
    Next,
    Wait(Duration),
    Stop,
}

enum FetchFailure {
    Transport(TransportError),
    Status(u16),
    RangeMismatch(String),
}

// Lock order: active_chunk, then plan, then phase.
struct SessionInner {
    request: TransportRequest,
    settings: SessionSettings,
    transport: Arc<dyn HttpTransport>,
    observer: Arc<dyn SessionObserver>,
    phase: Mutex<SessionPhase>,
    plan: Mutex<ChunkPlan>,
    active_chunk: Mutex<Option<ChunkBuffer>>,
    chunk_offset: AtomicUsize,
    bytes_received: AtomicU64,
    last_data_at: Mutex<Instant>,
    status_code: AtomicU16,
    tasks: Mutex<SessionTasks>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

impl SessionInner {
    fn lock_phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_plan(&self) -> MutexGuard<'_, ChunkPlan> {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_chunk(&self) -> MutexGuard<'_, Option<ChunkBuffer>> {
        self.active_chunk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, SessionTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_data_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn is_finished(&self) -> bool {
        self.lock_phase().is_finished()
    }

    /// Moves to `next` unless the session already ended.
    fn set_phase(&self, next: SessionPhase) {
        let mut phase = self.lock_phase();
        if !phase.is_finished() {
            *phase = next;
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )]
    fn report(&self, status: DownloadStatus) -> DownloadReport {
        let bytes_received = self.bytes_received.load(Ordering::SeqCst);
        let progress = if status.is_success() {
            1.0
        } else {
            match self.lock_plan().total_size {
                Some(total) if total > 0 => {
                    (bytes_received as f64 / total as f64).min(1.0) as f32
                }
                _ => 0.0,
            }
        };
        DownloadReport {
            progress,
            bytes_received,
            http_status: self.status_code.load(Ordering::SeqCst),
            status,
        }
    }

    fn track_request(&self, handle: AbortHandle) {
        let mut tasks = self.lock_tasks();
        if tasks.closed {
            handle.abort();
        } else {
            tasks.request = Some(handle);
        }
    }

    /// Interprets the size-discovery response. Returns false if the session ended.
    fn apply_head(&self, head: Result<HeadResponse, TransportError>) -> bool {
        if self.is_finished() {
            return false;
        }
        let head = match head {
            Ok(head) => head,
            Err(error) => {
                self.terminate(
                    DownloadStatus::InvalidResponse,
                    &format!("size discovery failed: {error}"),
                    true,
                );
                return false;
            }
        };

        self.status_code.store(head.status, Ordering::SeqCst);
        if !is_accepted_status(head.status) {
            self.terminate(
                DownloadStatus::InvalidStatusCode,
                &format!("size discovery returned HTTP {}", head.status),
                true,
            );
            return false;
        }

        let total_size = content_length(&head.headers);
        let accepts = accepts_ranges(&head.headers);
        let uses_ranges = accepts && total_size.is_some_and(|total| total > self.settings.max_chunk_size);
        {
            let mut plan = self.lock_plan();
            plan.total_size = total_size;
            plan.accepts_ranges = accepts;
            plan.uses_ranges = uses_ranges;
        }
        info!(
            url = %self.request.url,
            total_size = ?total_size,
            accepts_ranges = accepts,
            uses_ranges,
            "size discovered"
        );
        self.set_phase(SessionPhase::PlanningChunk);
        true
    }

    /// Allocates the next chunk and returns the request that fills it.
    fn plan_request(&self) -> Option<TransportRequest> {
        let planned = {
            let mut active = self.lock_chunk();
            let plan = self.lock_plan();
            if self.is_finished() {
                return None;
            }
            match plan.next_range(self.settings.max_chunk_size) {
                NextRange::Range(range) => match ChunkBuffer::plan(
                    range.start,
                    range.end,
                    plan.total_size.unwrap_or(0),
                    self.settings.buffer_padding,
                ) {
                    Some(chunk) => {
                        *active = Some(chunk);
                        self.chunk_offset.store(0, Ordering::SeqCst);
                        self.touch();
                        self.set_phase(SessionPhase::FetchingChunk);
                        Ok((range, plan.uses_ranges))
                    }
                    None => Err(DownloadStatus::ValidationFailed),
                },
                NextRange::Finished => Err(DownloadStatus::Success),
                NextRange::Invalid => Err(DownloadStatus::ValidationFailed),
            }
        };

        match planned {
            Ok((range, uses_ranges)) => {
                debug!(start = range.start, end = range.end, uses_ranges, "chunk planned");
                Some(self.request.with_range(uses_ranges.then_some(range)))
            }
            Err(status) => {
                self.terminate(status, "no further range to fetch", true);
                None
            }
        }
    }

    /// Copies one body delivery into the active chunk.
    fn receive(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let handoff = {
            let mut active = self.lock_chunk();
            self.touch();
            let Some(chunk) = active.as_mut() else {
                debug!(bytes = bytes.len(), "delivery beyond planned range dropped");
                return;
            };

            let offset = self.chunk_offset.load(Ordering::SeqCst);
            let overflow = bytes.len().saturating_sub(chunk.room_after(offset));
            if overflow > 0 {
                chunk.grow(overflow);
            }
            chunk.write_at(offset, bytes);
            let written = offset + bytes.len();
            self.chunk_offset.store(written, Ordering::SeqCst);
            self.bytes_received
                .store(chunk.start_offset() + written as u64, Ordering::SeqCst);

            if overflow > 0 {
                self.split_overflowed(&mut active, written)
            } else {
                None
            }
        };

        if let Some(chunk) = handoff {
            self.observer.on_chunk_complete(chunk);
        }
        self.observer
            .on_progress(self.report(DownloadStatus::InProgress));
    }

    /// Hands off a chunk that received more than planned and, for a rangeless
    /// stream, plans the chunk that takes the following bytes.
    fn split_overflowed(
        &self,
        active: &mut Option<ChunkBuffer>,
        written: usize,
    ) -> Option<ChunkBuffer> {
        let mut chunk = active.take()?;
        let outcome = chunk.settle(written);
        let mut plan = self.lock_plan();
        plan.record_handoff(&chunk, outcome);
        self.chunk_offset.store(0, Ordering::SeqCst);
        debug!(
            start = chunk.start_offset(),
            end = chunk.end_offset(),
            "chunk overflowed, handing off"
        );

        if !plan.uses_ranges
            && let NextRange::Range(range) = plan.next_range(self.settings.max_chunk_size)
        {
            *active = ChunkBuffer::plan(
                range.start,
                range.end,
                plan.total_size.unwrap_or(0),
                self.settings.buffer_padding,
            );
        }
        Some(chunk)
    }

    fn after_request(&self, joined: Result<Result<(), FetchFailure>, JoinError>) -> Step {
        self.lock_tasks().request = None;
        if self.is_finished() {
            return Step::Stop;
        }
        match joined {
            Ok(Ok(())) => self.complete_request(),
            Ok(Err(FetchFailure::Status(code))) => {
                self.terminate(
                    DownloadStatus::InvalidStatusCode,
                    &format!("chunk request returned HTTP {code}"),
                    true,
                );
                Step::Stop
            }
            Ok(Err(FetchFailure::RangeMismatch(message))) => {
                self.terminate(DownloadStatus::ValidationFailed, &message, true);
                Step::Stop
            }
            Ok(Err(FetchFailure::Transport(error))) => self.retry_chunk(&error.to_string()),
            Err(error) if error.is_cancelled() => self.retry_chunk("request stalled"),
            Err(error) => self.retry_chunk(&format!("request task failed: {error}")),
        }
    }

    fn complete_request(&self) -> Step {
        let (handoff, continuation) = {
            let mut active = self.lock_chunk();
            let mut plan = self.lock_plan();
            let written = self.chunk_offset.swap(0, Ordering::SeqCst);
            let mut handoff = None;
            if let Some(mut chunk) = active.take() {
                match chunk.settle(written) {
                    ChunkOutcome::Empty => plan.last_outcome = Some(ChunkOutcome::Empty),
                    outcome => {
                        plan.record_handoff(&chunk, outcome);
                        handoff = Some(chunk);
                    }
                }
            }
            (handoff, plan.after_request())
        };

        if let Some(chunk) = handoff {
            self.set_phase(SessionPhase::HandingOff);
            debug!(
                start = chunk.start_offset(),
                end = chunk.end_offset(),
                "chunk complete"
            );
            self.observer.on_chunk_complete(chunk);
        }

        match continuation {
            Continuation::NextChunk => {
                self.set_phase(SessionPhase::PlanningChunk);
                Step::Next
            }
            Continuation::Retry(reason) => self.retry_chunk(reason),
            Continuation::Done { complete } => {
                if !complete {
                    warn!(
                        url = %self.request.url,
                        received = self.bytes_received.load(Ordering::SeqCst),
                        "stream ended before the advertised size"
                    );
                }
                self.terminate(DownloadStatus::Success, "all data received", true);
                Step::Stop
            }
        }
    }

    fn retry_chunk(&self, reason: &str) -> Step {
        let decision = {
            let mut active = self.lock_chunk();
            let mut plan = self.lock_plan();
            *active = None;
            self.chunk_offset.store(0, Ordering::SeqCst);
            let decision = self.settings.retry.decide(plan.retry_count);
            if matches!(decision, RetryDecision::Retry { .. }) {
                plan.retry_count += 1;
                if !plan.uses_ranges {
                    plan.restart();
                    self.bytes_received.store(0, Ordering::SeqCst);
                }
            }
            decision
        };

        match decision {
            RetryDecision::Retry { delay, attempt } => {
                self.set_phase(SessionPhase::Retrying);
                warn!(
                    url = %self.request.url,
                    attempt,
                    delay_ms = delay.as_millis(),
                    reason,
                    "retrying chunk"
                );
                Step::Wait(delay)
            }
            RetryDecision::GiveUp { reason: why } => {
                self.terminate(
                    DownloadStatus::NetworkError,
                    &format!("{reason}; {why}"),
                    true,
                );
                Step::Stop
            }
        }
    }

    /// Cancels the in-flight request if it has been silent too long.
    fn check_stall(&self) {
        let silent = self
            .last_data_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed();
        if silent <= self.settings.stall_timeout {
            return;
        }
        {
            let mut phase = self.lock_phase();
            if *phase != SessionPhase::FetchingChunk {
                return;
            }
            *phase = SessionPhase::Stalled;
        }
        warn!(
            url = %self.request.url,
            silent_ms = silent.as_millis(),
            "no data received, canceling request"
        );
        if let Some(request) = self.lock_tasks().request.take() {
            request.abort();
        }
    }

    /// The single exit of a session. Returns false if it had already ended.
    fn terminate(&self, status: DownloadStatus, message: &str, notify: bool) -> bool {
        let next = match status {
            DownloadStatus::Success => SessionPhase::Completed,
            DownloadStatus::UserCancelled => SessionPhase::Canceled,
            _ => SessionPhase::Failed,
        };
        {
            let mut phase = self.lock_phase();
            if phase.is_finished() {
                return false;
            }
            *phase = next;
        }

        let driver = {
            let mut tasks = self.lock_tasks();
            let driver = tasks.driver.take();
            tasks.abort_all();
            driver
        };
        drop(self.lock_chunk().take());

        let http_status = self.status_code.load(Ordering::SeqCst);
        match status {
            DownloadStatus::Success => info!(
                url = %self.request.url,
                bytes = self.bytes_received.load(Ordering::SeqCst),
                "download session completed"
            ),
            DownloadStatus::UserCancelled => {
                info!(url = %self.request.url, notify, message, "download session canceled");
            }
            _ => warn!(
                url = %self.request.url,
                status = %status,
                http_status,
                message,
                "download session failed"
            ),
        }

        if notify {
            self.observer.on_complete(self.report(status));
        }
        if let Some(driver) = driver {
            driver.abort();
        }
        true
    }
}

async fn drive(weak: Weak<SessionInner>) {
    let Some((transport, request)) = weak
        .upgrade()
        .map(|inner| (Arc::clone(&inner.transport), inner.request.clone()))
    else {
        return;
    };
    let head = transport.head(&request).await;
    drop(transport);
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.apply_head(head) {
        return;
    }
    drop(inner);

    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let Some(request) = inner.plan_request() else {
            return;
        };
        let fetch = tokio::spawn(fetch_chunk(
            weak.clone(),
            Arc::clone(&inner.transport),
            request,
        ));
        inner.track_request(fetch.abort_handle());
        drop(inner);

        let joined = fetch.await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match inner.after_request(joined) {
            Step::Next => {}
            Step::Wait(delay) => {
                drop(inner);
                tokio::time::sleep(delay).await;
            }
            Step::Stop => return,
        }
    }
}

async fn fetch_chunk(
    weak: Weak<SessionInner>,
    transport: Arc<dyn HttpTransport>,
    request: TransportRequest,
) -> Result<(), FetchFailure> {
    let response = transport
        .get(&request)
        .await
        .map_err(FetchFailure::Transport)?;
    if let Some(inner) = weak.upgrade() {
        inner.status_code.store(response.status, Ordering::SeqCst);
    }
    if !is_accepted_status(response.status) {
        return Err(FetchFailure::Status(response.status));
    }
    if let Some(range) = request.range {
        check_range_response(range, response.status, &response.headers)
            .map_err(FetchFailure::RangeMismatch)?;
    }

    let mut body = response.body;
    while let Some(delivery) = body.next().await {
        let bytes = delivery.map_err(FetchFailure::Transport)?;
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        inner.receive(&bytes);
    }
    Ok(())
}

/// Rejects a range response whose body does not begin at the requested byte.
///
/// A 200 answer carries the file from byte 0, which only fits the first range.
fn check_range_response(range: ByteRange, status: u16, headers: &HeaderMap) -> Result<(), String> {
    if status == 206 {
        return match content_range_start(headers) {
            Some(start) if start != range.start => Err(format!(
                "server answered range {}-{} starting at byte {start}",
                range.start, range.end
            )),
            _ => Ok(()),
        };
    }
    if range.start > 0 {
        return Err(format!(
            "server ignored range {}-{} and answered HTTP {status}",
            range.start, range.end
        ));
    }
    Ok(())
}

async fn monitor_stalls(weak: Weak<SessionInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_finished() {
            return;
        }
        inner.check_stall();
    }
}
