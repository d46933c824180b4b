//! In-memory buffer for one in-flight byte range.

use std::fmt;

/// How a chunk ended once its request stopped delivering into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// At least the planned number of bytes arrived.
    Full,
    /// Some bytes arrived, but fewer than planned.
    EndedEarly,
    /// No bytes arrived.
    Empty,
}

/// One planned range of the target file and the bytes received for it.
///
/// The buffer is move-only: it is owned by the session while streaming and
/// handed to the disk writer as a whole.
pub struct ChunkBuffer {
    start_offset: u64,
    end_offset: u64,
    total_file_size: u64,
    planned_len: usize,
    data: Vec<u8>,
}

impl ChunkBuffer {
    /// Allocates a buffer for `[start_offset, end_offset]`.
    ///
    /// Capacity covers the range plus `padding` so a slight over-delivery does
    /// not reallocate. `total_file_size` is 0 when unknown.
    ///
    /// Returns `None` when the range is empty or does not fit in memory.
    #[must_use]
    pub fn plan(start_offset: u64, end_offset: u64, total_file_size: u64, padding: usize) -> Option<Self> {
        if end_offset < start_offset {
            return None;
        }
        let planned_len = usize::try_from(end_offset - start_offset + 1).ok()?;
        let mut data = Vec::with_capacity(planned_len.checked_add(padding)?);
        data.resize(planned_len, 0);
        Some(Self {
            start_offset,
            end_offset,
            total_file_size,
            planned_len,
            data,
        })
    }

    /// First byte of the range.
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Last byte of the range (inclusive).
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Size of the whole file, 0 when unknown.
    #[must_use]
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    /// Bytes originally planned for this range.
    #[must_use]
    pub fn planned_len(&self) -> usize {
        self.planned_len
    }

    /// Current buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Received bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes still free between `offset` and the end of the buffer.
    #[must_use]
    pub fn room_after(&self, offset: usize) -> usize {
        self.data.len().saturating_sub(offset)
    }

    /// Extends the buffer and the planned end offset by `extra` bytes.
    pub fn grow(&mut self, extra: usize) {
        self.data.resize(self.data.len() + extra, 0);
        self.end_offset += extra as u64;
    }

    /// Copies `bytes` at `offset`, returning how many bytes fit.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> usize {
        let fit = bytes.len().min(self.room_after(offset));
        if fit > 0 {
            self.data[offset..offset + fit].copy_from_slice(&bytes[..fit]);
        }
        fit
    }

    /// Truncates the buffer to `written` bytes and classifies the chunk.
    ///
    /// Afterwards `end_offset` names the last byte actually received, so the
    /// next range starts right after it.
    pub fn settle(&mut self, written: usize) -> ChunkOutcome {
        let written = written.min(self.data.len());
        self.data.truncate(written);
        if written == 0 {
            return ChunkOutcome::Empty;
        }
        self.end_offset = self.start_offset + written as u64 - 1;
        if written < self.planned_len {
            ChunkOutcome::EndedEarly
        } else {
            ChunkOutcome::Full
        }
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("start_offset", &self.start_offset)
            .field("end_offset", &self.end_offset)
            .field("total_file_size", &self.total_file_size)
            .field("planned_len", &self.planned_len)
            .field("len", &self.data.len())
            .finish()
    }
}
