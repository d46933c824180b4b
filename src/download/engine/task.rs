//! One download: a session, its disk writer and its gate membership.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{DownloadEvent, DownloadRequest};
use crate::download::constants::PENDING_WRITE_POLL;
use crate::download::gate::{AdmissionGate, GateMember};
use crate::download::session::{DownloadSession, SessionObserver, SessionSettings};
use crate::download::transport::{HttpTransport, TransportRequest};
use crate::download::writer::{DiskWriter, FreeSpaceProbe};
use crate::download::{ChunkBuffer, DownloadConfig, DownloadReport, DownloadStatus};

/// Shared services a task is built from.
pub(super) struct TaskContext<'a> {
    pub config: &'a DownloadConfig,
    pub transport: Arc<dyn HttpTransport>,
    pub gate: Arc<AdmissionGate>,
    pub probe: Arc<dyn FreeSpaceProbe>,
    pub runtime: Handle,
}

pub(super) struct DownloadTask {
    url: String,
    save_path: PathBuf,
    session: DownloadSession,
    writer: Arc<DiskWriter>,
    gate: Arc<AdmissionGate>,
    runtime: Handle,
    self_ref: Weak<DownloadTask>,
    started: AtomicBool,
    finished: AtomicBool,
    shut_down: AtomicBool,
    published: AtomicBool,
    chunk_tx: Mutex<Option<mpsc::UnboundedSender<ChunkBuffer>>>,
    report_tx: watch::Sender<DownloadReport>,
    events: Mutex<Option<mpsc::UnboundedSender<DownloadEvent>>>,
}

impl DownloadTask {
    pub(super) fn new(request: DownloadRequest, temp_path: PathBuf, ctx: TaskContext<'_>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Self>| {
            let observer = Arc::new(TaskObserver {
                task: self_ref.clone(),
            });
            let session = DownloadSession::new(
                TransportRequest::new(request.url.clone(), request.content_type.clone()),
                SessionSettings::from(ctx.config),
                ctx.transport,
                observer,
            );
            let writer = Arc::new(DiskWriter::new(temp_path, request.save_path.clone(), ctx.probe));
            let (report_tx, _) = watch::channel(DownloadReport::default());

            Self {
                url: request.url,
                save_path: request.save_path,
                session,
                writer,
                gate: ctx.gate,
                runtime: ctx.runtime,
                self_ref: self_ref.clone(),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                published: AtomicBool::new(false),
                chunk_tx: Mutex::new(None),
                report_tx,
                events: Mutex::new(None),
            }
        })
    }

    pub(super) fn member(&self) -> Weak<dyn GateMember> {
        self.self_ref.clone()
    }

    pub(super) fn url(&self) -> &str {
        &self.url
    }

    pub(super) fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub(super) fn temp_path(&self) -> &Path {
        self.writer.temp_path()
    }

    pub(super) fn session(&self) -> &DownloadSession {
        &self.session
    }

    pub(super) fn report(&self) -> DownloadReport {
        *self.report_tx.borrow()
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<DownloadReport> {
        self.report_tx.subscribe()
    }

    pub(super) fn is_complete(&self) -> bool {
        self.published.load(Ordering::SeqCst)
    }

    pub(super) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Replaces the event subscriber; a finished download replays its final report.
    pub(super) fn take_events(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = self.lock_events();
        if self.is_complete() {
            let _ = tx.send(DownloadEvent::Finished(self.report()));
        }
        *events = Some(tx);
        rx
    }

    /// Stops the download without a terminal notification and releases its slot.
    pub(super) fn shutdown(&self) {
        if self.session.is_finished() || self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.shutdown();
        drop(self.lock_chunk_tx().take());
        self.writer.discard();
        debug!(url = %self.url, "download shut down");
        self.report_tx.send_modify(|_| {});
        self.gate.unregister(&self.member());
    }

    fn lock_events(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<DownloadEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_chunk_tx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<ChunkBuffer>>> {
        self.chunk_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_progress(&self, report: DownloadReport) {
        if self.is_complete() || self.is_shut_down() {
            return;
        }
        self.report_tx.send_replace(report);
        let mut events = self.lock_events();
        let dropped = events
            .as_ref()
            .is_some_and(|tx| tx.send(DownloadEvent::Progress(report)).is_err());
        if dropped {
            *events = None;
        }
    }

    fn publish_finished(&self, report: DownloadReport) {
        let mut events = self.lock_events();
        if self.published.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = events.take() {
            let _ = tx.send(DownloadEvent::Finished(report));
        }
        self.report_tx.send_replace(report);
    }

    fn enqueue_write(&self, chunk: ChunkBuffer) {
        let sender = self.lock_chunk_tx().clone();
        let Some(sender) = sender else {
            warn!(url = %self.url, start = chunk.start_offset(), "chunk arrived with no open file");
            self.session
                .fail(DownloadStatus::FileSystemError, "no open file for completed chunk");
            return;
        };
        self.writer.schedule();
        if sender.send(chunk).is_err() {
            self.writer.unschedule();
            self.session
                .fail(DownloadStatus::FileSystemError, "disk writer stopped");
        }
    }

    /// Waits for pending writes, settles the temp file, publishes the final
    /// report and frees the gate slot.
    async fn finish(self: Arc<Self>, report: DownloadReport) {
        let mut status = report.status;
        if self.writer.is_opened() {
            while self.writer.pending_writes() > 0 {
                tokio::time::sleep(PENDING_WRITE_POLL).await;
            }
            if status.is_success()
                && let Some(failure) = self.writer.failure()
            {
                status = failure;
            }

            let writer = Arc::clone(&self.writer);
            let success = status.is_success();
            match tokio::task::spawn_blocking(move || writer.finalize(success)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(url = %self.url, error = %error, "finalizing download failed");
                    if success {
                        status = DownloadStatus::FileSystemError;
                    }
                }
                Err(error) => {
                    warn!(url = %self.url, error = %error, "finalize task failed");
                    if success {
                        status = DownloadStatus::FileSystemError;
                    }
                }
            }
        }
        drop(self.lock_chunk_tx().take());

        let report = DownloadReport { status, ..report };
        info!(url = %self.url, status = %status, http_status = report.http_status, "download finished");
        self.finished.store(true, Ordering::SeqCst);
        self.publish_finished(report);
        self.gate.unregister(&self.member());
    }
}

impl GateMember for DownloadTask {
    fn is_active(&self) -> bool {
        self.started.load(Ordering::SeqCst)
            && !self.finished.load(Ordering::SeqCst)
            && !self.is_shut_down()
    }

    fn activate(&self) {
        if self.session.is_finished() || self.is_shut_down() {
            return;
        }
        let mut claimed = false;
        let admitted = self
            .gate
            .try_admit(|| claimed = !self.started.swap(true, Ordering::SeqCst));
        if !admitted {
            debug!(url = %self.url, "no free slot, waiting");
            self.publish_progress(DownloadReport {
                status: DownloadStatus::WaitingForOtherDownload,
                ..DownloadReport::default()
            });
            return;
        }
        if !claimed {
            return;
        }

        let _runtime = self.runtime.enter();
        info!(url = %self.url, path = %self.save_path.display(), "download admitted");
        if let Err(error) = self.writer.open() {
            self.session
                .fail(DownloadStatus::FileSystemError, &error.to_string());
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.lock_chunk_tx() = Some(tx);
        self.runtime.spawn(run_writes(
            Arc::clone(&self.writer),
            rx,
            self.session.clone(),
        ));

        self.publish_progress(DownloadReport {
            status: DownloadStatus::InProgress,
            ..DownloadReport::default()
        });
        self.session.begin();
    }
}

impl Drop for DownloadTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Writes handed-off chunks one at a time, in arrival order.
async fn run_writes(
    writer: Arc<DiskWriter>,
    mut chunks: mpsc::UnboundedReceiver<ChunkBuffer>,
    session: DownloadSession,
) {
    while let Some(chunk) = chunks.recv().await {
        let job = Arc::clone(&writer);
        match tokio::task::spawn_blocking(move || job.write(&chunk)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => session.fail(error.status(), &error.to_string()),
            Err(error) => session.fail(
                DownloadStatus::FileSystemError,
                &format!("write task failed: {error}"),
            ),
        }
    }
}

/// Session callbacks routed back to the owning task, if it still exists.
struct TaskObserver {
    task: Weak<DownloadTask>,
}

impl SessionObserver for TaskObserver {
    fn on_progress(&self, report: DownloadReport) {
        if let Some(task) = self.task.upgrade() {
            task.publish_progress(report);
        }
    }

    fn on_chunk_complete(&self, chunk: ChunkBuffer) {
        if let Some(task) = self.task.upgrade() {
            task.enqueue_write(chunk);
        }
    }

    fn on_complete(&self, report: DownloadReport) {
        if let Some(task) = self.task.upgrade() {
            let runtime = task.runtime.clone();
            runtime.spawn(task.finish(report));
        }
    }
}
