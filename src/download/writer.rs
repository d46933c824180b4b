//! Serialized persistence of completed chunks to a temp file.
//!
//! All methods block on file I/O; callers run them on a blocking thread.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use super::DownloadStatus;
use super::chunk::ChunkBuffer;
use super::constants::{DISK_SPACE_MARGIN, RELOCATE_ATTEMPTS, RELOCATE_RETRY_DELAY};
use super::error::WriteError;

/// Reports free space on the volume holding a path.
pub trait FreeSpaceProbe: Send + Sync {
    /// Returns available bytes for the volume holding `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform cannot answer; the writer then skips
    /// the space check.
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// [`FreeSpaceProbe`] backed by `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFreeSpace;

impl FreeSpaceProbe for SystemFreeSpace {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Writes chunks of one download to its temp file and moves the result into place.
pub struct DiskWriter {
    temp_path: PathBuf,
    destination: PathBuf,
    probe: Arc<dyn FreeSpaceProbe>,
    file: Mutex<Option<File>>,
    opened: AtomicBool,
    pending: AtomicUsize,
    failure: Mutex<Option<DownloadStatus>>,
}

impl std::fmt::Debug for DiskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriter")
            .field("temp_path", &self.temp_path)
            .field("destination", &self.destination)
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DiskWriter {
    /// Creates a writer; nothing touches the disk until [`open`](Self::open).
    pub fn new(
        temp_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        probe: Arc<dyn FreeSpaceProbe>,
    ) -> Self {
        Self {
            temp_path: temp_path.into(),
            destination: destination.into(),
            probe,
            file: Mutex::new(None),
            opened: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Temp file path.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Final destination path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Creates missing parent directories, removes any stale temp file and
    /// opens a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if the directory or the file cannot be created.
    #[instrument(level = "debug", skip(self), fields(path = %self.temp_path.display()))]
    pub fn open(&self) -> Result<(), WriteError> {
        ensure_parent(&self.temp_path)?;
        remove_if_exists(&self.temp_path)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| WriteError::io(&self.temp_path, e))?;

        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        self.opened.store(true, Ordering::SeqCst);
        debug!("temp file opened");
        Ok(())
    }

    /// Returns true once [`open`](Self::open) succeeded.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Records that a chunk write has been scheduled.
    pub fn schedule(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Withdraws a [`schedule`](Self::schedule) whose write will never run.
    pub fn unschedule(&self) {
        drop(PendingWrite(&self.pending));
    }

    /// Writes scheduled but not yet finished.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Status of the first failed write, if any.
    #[must_use]
    pub fn failure(&self) -> Option<DownloadStatus> {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Performs one write scheduled with [`schedule`](Self::schedule).
    ///
    /// Checks free space, seeks to the chunk start, writes the chunk and syncs
    /// it to storage. Once a write has failed every later write is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::InsufficientSpace`] when the volume is too full,
    /// or another [`WriteError`] when the file is closed or the write fails.
    pub fn write(&self, chunk: &ChunkBuffer) -> Result<(), WriteError> {
        let _completion = PendingWrite(&self.pending);
        if self.failure().is_some() {
            debug!(start = chunk.start_offset(), "skipping write after earlier failure");
            return Ok(());
        }
        let result = self.write_locked(chunk);
        if let Err(error) = &result {
            self.failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(error.status());
        }
        result
    }

    fn write_locked(&self, chunk: &ChunkBuffer) -> Result<(), WriteError> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_mut() else {
            return Err(WriteError::NotOpen {
                start: chunk.start_offset(),
                end: chunk.end_offset(),
            });
        };

        self.check_free_space(chunk)?;

        file.seek(SeekFrom::Start(chunk.start_offset()))
            .map_err(|e| WriteError::io(&self.temp_path, e))?;
        file.write_all(chunk.data())
            .map_err(|e| WriteError::io(&self.temp_path, e))?;
        file.flush().map_err(|e| WriteError::io(&self.temp_path, e))?;
        file.sync_data()
            .map_err(|e| WriteError::io(&self.temp_path, e))?;

        debug!(
            start = chunk.start_offset(),
            end = chunk.end_offset(),
            bytes = chunk.len(),
            "chunk written"
        );
        Ok(())
    }

    fn check_free_space(&self, chunk: &ChunkBuffer) -> Result<(), WriteError> {
        let volume = self.temp_path.parent().unwrap_or(&self.temp_path);
        match self.probe.available_space(volume) {
            Ok(available) => {
                let required = chunk.end_offset().saturating_add(DISK_SPACE_MARGIN);
                if available < required {
                    return Err(WriteError::InsufficientSpace {
                        path: self.temp_path.clone(),
                        required,
                        available,
                    });
                }
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "free space query unavailable, skipping check");
                Ok(())
            }
        }
    }

    /// Flushes and releases the file handle, waiting for an in-flight write.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Io`] if the final sync fails.
    pub fn close(&self) -> Result<(), WriteError> {
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(file) = file {
            file.sync_all()
                .map_err(|e| WriteError::io(&self.temp_path, e))?;
        }
        Ok(())
    }

    /// Closes the file, then moves it to the destination on success or
    /// deletes it otherwise.
    ///
    /// An existing destination file is replaced by the move itself, so it
    /// survives every failed attempt. After the last failed attempt the temp
    /// file is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] when closing fails or the move keeps failing.
    #[instrument(level = "debug", skip(self), fields(dest = %self.destination.display()))]
    pub fn finalize(&self, success: bool) -> Result<(), WriteError> {
        let closed = self.close();
        if !success {
            self.discard();
            return closed;
        }
        closed?;

        for attempt in 1..=RELOCATE_ATTEMPTS {
            let moved = ensure_parent(&self.destination).and_then(|()| {
                relocate(&self.temp_path, &self.destination)
                    .map_err(|e| WriteError::io(&self.destination, e))
            });
            match moved {
                Ok(()) => {
                    info!(path = %self.destination.display(), "download saved");
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt, error = %error, "moving temp file failed");
                    if attempt < RELOCATE_ATTEMPTS {
                        std::thread::sleep(RELOCATE_RETRY_DELAY);
                    }
                }
            }
        }

        self.discard();
        Err(WriteError::Relocate {
            from: self.temp_path.clone(),
            to: self.destination.clone(),
            attempts: RELOCATE_ATTEMPTS,
        })
    }

    /// Drops the file handle and deletes the temp file this writer created.
    pub fn discard(&self) {
        drop(
            self.file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if !self.is_opened() {
            return;
        }
        match fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = %self.temp_path.display(), "temp file deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.temp_path.display(), error = %e, "could not delete temp file"),
        }
    }
}

/// Marks a scheduled write as finished when dropped.
struct PendingWrite<'a>(&'a AtomicUsize);

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

fn ensure_parent(path: &Path) -> Result<(), WriteError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| WriteError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), WriteError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WriteError::io(path, e)),
    }
}

/// Renames over `to`, falling back to copy and delete where rename cannot
/// (across volumes, or onto an existing file on some platforms).
fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    let rename_error = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };
    fs::copy(from, to).map_err(|_| rename_error)?;
    fs::remove_file(from)
}
