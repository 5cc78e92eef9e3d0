// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Buffered Stage
//!
//! Reconciles arbitrary-offset, arbitrary-size byte I/O with a successor
//! that requires block-aligned transfers. A single block-sized cache
//! absorbs write amplification: small writes coalesce in the buffer, and a
//! write into the middle of an existing block becomes a read-modify-write.
//!
//! The buffer always covers one aligned window of the file
//! (`buf_offset .. buf_offset + buf_size`). An operation outside the
//! current window flushes the buffer (if dirty) and moves the window.
//! Purely sequential reads or writes therefore never reposition, and
//! transfers that are already aligned and at least one buffer long bypass
//! the cache entirely.
//!
//! The stage tracks the highest file position it has seen. Once the size
//! is confirmed (truncation on open, or a short read from the successor),
//! a write that would land beyond the end of the data is refused as a hole
//! rather than silently creating one.
//!
//! Seeks and appends are not compatible with successors that produce
//! variable-size records on their own; this stage publishes a block size
//! of 1 and is the standard way to put byte semantics on top of the
//! framing stages.

use std::path::Path;

use tracing::{debug, trace};

use iostack_domain::{BlockSize, OpenFlags, Stage, StageExt, StackError};

/// Byte-level buffering over a block-aligned successor.
pub struct BufferedStage {
    suggested_size: usize,
    next: Box<dyn Stage>,

    buf: Vec<u8>,
    buf_size: usize,
    buf_offset: u64,
    buf_actual: usize,
    dirty: bool,

    file_size: u64,
    size_confirmed: bool,

    readable: bool,
    writable: bool,
    open: bool,
    eof: bool,
}

impl BufferedStage {
    /// Default cache size when the caller does not suggest one.
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    /// Creates a buffered stage over `next`. The buffer will be
    /// `suggested_size` rounded up to the successor's block size; 0 selects
    /// the default.
    pub fn new(suggested_size: usize, next: Box<dyn Stage>) -> Self {
        let suggested_size = if suggested_size == 0 {
            Self::DEFAULT_BUFFER_SIZE
        } else {
            suggested_size
        };
        Self {
            suggested_size,
            next,
            buf: Vec::new(),
            buf_size: 0,
            buf_offset: 0,
            buf_actual: 0,
            dirty: false,
            file_size: 0,
            size_confirmed: false,
            readable: false,
            writable: false,
            open: false,
            eof: false,
        }
    }

    fn require_open(&self) -> Result<(), StackError> {
        if self.open {
            Ok(())
        } else {
            Err(StackError::not_open("buffered stage"))
        }
    }

    /// Moves the buffer window to the block containing `offset`, flushing
    /// the old window first. No-op when the window already matches.
    fn realign(&mut self, offset: u64) -> Result<(), StackError> {
        let new_block = offset - offset % self.buf_size as u64;
        if new_block == self.buf_offset {
            return Ok(());
        }
        trace!(offset, new_block, old_block = self.buf_offset, "realign buffer");
        self.flush()?;
        self.buf_offset = new_block;
        self.buf_actual = 0;
        Ok(())
    }

    /// Writes the buffer to the successor if it holds dirty data. The
    /// buffer contents stay valid.
    fn flush(&mut self) -> Result<(), StackError> {
        if !self.dirty {
            return Ok(());
        }
        trace!(
            buf_offset = self.buf_offset,
            buf_actual = self.buf_actual,
            "flush dirty buffer"
        );
        let written = self.next.write_all(&self.buf[..self.buf_actual], self.buf_offset)?;
        if written != self.buf_actual {
            return Err(StackError::Io {
                errno: 0,
                message: format!(
                    "short flush: wrote {} of {} bytes at offset {}",
                    written, self.buf_actual, self.buf_offset
                ),
            });
        }
        self.file_size = self.file_size.max(self.buf_offset + self.buf_actual as u64);
        self.dirty = false;
        Ok(())
    }

    /// Fills an empty buffer from the successor. EOF is not an error here;
    /// a write at the end of the file starts from an empty window.
    fn fill(&mut self) -> Result<(), StackError> {
        if self.buf_actual > 0 {
            return Ok(());
        }

        // Cheap EOF test without touching the successor.
        if self.size_confirmed && self.buf_offset == self.file_size {
            self.eof = true;
            return Ok(());
        }
        if self.size_confirmed && self.buf_offset > self.file_size {
            return Err(StackError::hole(format!(
                "buffer window at {} is beyond the known file size {}",
                self.buf_offset, self.file_size
            )));
        }

        let buf_size = self.buf_size;
        let actual = self.next.read_all(&mut self.buf[..buf_size], self.buf_offset)?;
        trace!(buf_offset = self.buf_offset, actual, "fill buffer");

        // A short fill pins down the exact file size.
        self.size_confirmed |= actual < self.buf_size;
        self.buf_actual = actual;
        self.file_size = self.file_size.max(self.buf_offset + actual as u64);
        Ok(())
    }

    /// Copies caller data into the window, extending the valid region.
    fn copy_in(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        if offset > self.buf_offset + self.buf_actual as u64 {
            return Err(StackError::hole(format!(
                "write at {} would leave a gap after {} bytes at {}",
                offset, self.buf_actual, self.buf_offset
            )));
        }

        let pos = (offset - self.buf_offset) as usize;
        let actual = (self.buf_size - pos).min(buf.len());
        self.buf[pos..pos + actual].copy_from_slice(&buf[..actual]);
        self.dirty = true;
        self.buf_actual = self.buf_actual.max(pos + actual);
        self.file_size = self.file_size.max(self.buf_offset + self.buf_actual as u64);
        Ok(actual)
    }

    /// Copies window data out to the caller.
    fn copy_out(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        let pos = (offset - self.buf_offset) as usize;
        if pos > self.buf_actual {
            return Err(StackError::hole(format!(
                "read at {} skips past the {} valid bytes at {}",
                offset, self.buf_actual, self.buf_offset
            )));
        }
        let actual = (self.buf_actual - pos).min(buf.len());
        buf[..actual].copy_from_slice(&self.buf[pos..pos + actual]);
        Ok(actual)
    }
}

impl Stage for BufferedStage {
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        self.readable = flags.readable();
        self.writable = flags.writable();

        // Read-modify-write needs read access below us even when the
        // caller asked for write-only.
        let down = flags.upgraded_to_read_write();
        self.next.open(path, &down)?;

        // Pick a buffer size which is a multiple of the successor's block
        // size and at least as large as the suggestion.
        let next_block = match BlockSize::new(self.next.block_size()) {
            Ok(block) => block,
            Err(e) => {
                let _ = self.next.close();
                return Err(e);
            }
        };
        self.buf_size = next_block.round_up(self.suggested_size as u64) as usize;
        self.buf = vec![0u8; self.buf_size];
        debug!(
            path = %path.display(),
            buf_size = self.buf_size,
            successor_block = next_block.bytes(),
            "opened buffered stage"
        );

        self.buf_offset = 0;
        self.buf_actual = 0;
        self.dirty = false;
        self.file_size = 0;
        self.size_confirmed = flags.truncate();
        self.eof = false;
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if !self.readable {
            return Err(StackError::not_supported("read on a write-only handle"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        trace!(offset, size = buf.len(), "buffered read");

        self.realign(offset)?;

        // Aligned whole-buffer reads bypass the cache.
        if self.buf_actual == 0 && offset == self.buf_offset && buf.len() >= self.buf_size {
            let aligned = buf.len() / self.buf_size * self.buf_size;
            let actual = self.next.read(&mut buf[..aligned], offset)?;
            if actual > 0 {
                self.file_size = self.file_size.max(offset + actual as u64);
            }
            self.eof = actual == 0;
            return Ok(actual);
        }

        self.fill()?;
        let actual = self.copy_out(buf, offset)?;
        self.eof = actual == 0;
        Ok(actual)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if !self.writable {
            return Err(StackError::not_supported("write on a read-only handle"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        trace!(offset, size = buf.len(), "buffered write");

        self.realign(offset)?;

        // Aligned whole-buffer writes bypass the cache.
        if self.buf_actual == 0 && offset == self.buf_offset && buf.len() >= self.buf_size {
            let aligned = buf.len() / self.buf_size * self.buf_size;
            let actual = self.next.write(&buf[..aligned], offset)?;
            self.file_size = self.file_size.max(offset + actual as u64);
            return Ok(actual);
        }

        // Read-modify-write: bring the block in before updating it.
        self.fill()?;
        self.copy_in(buf, offset)
    }

    fn close(&mut self) -> Result<(), StackError> {
        let mut first_error: Option<StackError> = None;

        if self.open {
            if let Err(e) = self.flush() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.next.close() {
            first_error.get_or_insert(e);
        }

        self.buf = Vec::new();
        self.buf_size = 0;
        self.readable = false;
        self.writable = false;
        self.open = false;

        first_error.map_or(Ok(()), Err)
    }

    fn sync(&mut self) -> Result<(), StackError> {
        self.require_open()?;
        // Pass the sync down even if the flush fails.
        let flushed = self.flush();
        let synced = self.next.sync();
        flushed?;
        synced
    }

    fn truncate(&mut self, offset: u64) -> Result<(), StackError> {
        self.require_open()?;
        // Flush first so the successor holds everything, then let it cut.
        self.flush()?;
        self.next.truncate(offset)?;

        self.buf_offset = offset - offset % self.buf_size as u64;
        self.buf_actual = 0;
        self.dirty = false;
        self.file_size = offset;
        self.size_confirmed = true;
        Ok(())
    }

    fn size(&mut self) -> Result<u64, StackError> {
        self.require_open()?;
        if self.size_confirmed {
            return Ok(self.file_size);
        }
        self.flush()?;
        let size = self.next.size()?;
        Ok(size.max(self.file_size))
    }

    fn block_size(&self) -> usize {
        1
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(BufferedStage::new(self.suggested_size, self.next.clone_stage()))
    }
}
