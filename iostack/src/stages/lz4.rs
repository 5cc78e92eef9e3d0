// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Framed LZ4 Stage with Sidecar Index
//!
//! Compresses fixed-size plaintext records into variable-length compressed
//! records while still supporting record-aligned seeks. Each compressed
//! record is written as a length-prefixed frame; a sidecar index file
//! (`<path>.idx`), written in lockstep through a cloned successor
//! pipeline, stores the byte offset of every record in the primary file:
//!
//! ```text
//! primary:  [u32 len][compressed record 0][u32 len][compressed record 1]...
//! sidecar:  [u64 offset of record 0][u64 offset of record 1]...
//! ```
//!
//! After a full-sized record is written, the offset one past its end is
//! appended to the index as well, marking where the next record starts.
//! The stage keeps the index cursor in lockstep with the data stream: a
//! read consumes one index entry when the previous operation was also a
//! read, and a write after reads rewrites the current record's entry to
//! resynchronize. Random access reads the index entry for the target
//! record and repositions the compressed stream there.
//!
//! The end of data is marked by a partial record. `close` appends a
//! zero-length record when the last operation was a full-sized write, and
//! the size probe treats EOF while reading the final record as a
//! zero-length record, so a file that crashed before the marker remains
//! readable.

use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use iostack_domain::value_objects::block_size::BlockSize;
use iostack_domain::{OpenFlags, Stage, StageExt, StackError};

/// Suffix appended to the primary path to name the sidecar index.
pub const INDEX_SUFFIX: &str = ".idx";

fn index_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(INDEX_SUFFIX);
    PathBuf::from(name)
}

/// LZ4 record compression with a paired seek index.
pub struct Lz4Stage {
    record_size: usize,
    next: Box<dyn Stage>,
    /// Sidecar pipeline, a clone of the primary successor chain.
    index: Box<dyn Stage>,

    comp_buf: Vec<u8>,
    probe_buf: Vec<u8>,

    /// Logical offset of the next sequential record.
    plain_position: u64,
    /// Byte offset in the compressed primary file.
    comp_position: u64,
    /// Byte offset of the index cursor in the sidecar.
    index_position: u64,
    /// Keeps the index cursor in lockstep with the data stream.
    previous_read: bool,
    /// The last data operation was a full-sized write at the end.
    last_write_full: bool,

    writable: bool,
    open: bool,
    eof: bool,
}

impl Lz4Stage {
    /// Creates an LZ4 stage over `next`. `record_size` is the plaintext
    /// record size; the sidecar is opened through a clone of `next`.
    pub fn new(record_size: usize, next: Box<dyn Stage>) -> Self {
        let index = next.clone_stage();
        Self {
            record_size,
            next,
            index,
            comp_buf: Vec::new(),
            probe_buf: Vec::new(),
            plain_position: 0,
            comp_position: 0,
            index_position: 0,
            previous_read: true,
            last_write_full: false,
            writable: false,
            open: false,
            eof: false,
        }
    }

    fn require_open(&self) -> Result<(), StackError> {
        if self.open {
            Ok(())
        } else {
            Err(StackError::not_open("lz4 stage"))
        }
    }

    /// Repositions to the record containing `offset` using the sidecar
    /// index. Returns `false` when the target is past the indexed records,
    /// which is end-of-file for reads and a hole for writes.
    fn seek_to(&mut self, offset: u64, for_write: bool) -> Result<bool, StackError> {
        let record = self.record_size as u64;
        if offset % record != 0 {
            return Err(StackError::unaligned(format!(
                "compressed records must be addressed at {}-byte boundaries, not {}",
                record, offset
            )));
        }

        let record_nr = offset / record;
        self.index_position = record_nr * 8;
        match self.index.read_u64_at(self.index_position)? {
            Some(comp_offset) => {
                trace!(offset, record_nr, comp_offset, "lz4 seek");
                self.comp_position = comp_offset;
                self.index_position += 8;
                // The entry for this record was just consumed; the next
                // data operation must not consume another one.
                self.previous_read = false;
                self.plain_position = offset;
                Ok(true)
            }
            None if record_nr == 0 => {
                // A brand new file has no index yet; start at the origin.
                self.comp_position = 0;
                self.index_position = 0;
                self.previous_read = true;
                self.plain_position = 0;
                Ok(true)
            }
            None if for_write => Err(StackError::hole(format!(
                "write at {} is past the end of the compressed file",
                offset
            ))),
            None => Ok(false),
        }
    }
}

impl Stage for Lz4Stage {
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        if flags.append() {
            return Err(StackError::not_supported(
                "appending to a compressed file requires a buffered stage above it",
            ));
        }
        self.writable = flags.writable();

        // The size probe reads even when the caller only writes.
        let down = flags.upgraded_to_read_write();
        self.next.open(path, &down)?;

        let sidecar = index_path(path);
        if let Err(e) = self.index.open(&sidecar, &down) {
            let _ = self.next.close();
            return Err(e);
        }

        // Compressed records are variable sized, so the primary successor
        // must accept byte-aligned I/O; index entries are 8 bytes.
        if self.next.block_size() != 1 {
            let failure = StackError::incompatible_block_size(format!(
                "compressed records are variable sized but the successor requires {}-byte blocks",
                self.next.block_size()
            ));
            let _ = self.index.close();
            let _ = self.next.close();
            return Err(failure);
        }
        if 8 % self.index.block_size() != 0 {
            let failure = StackError::incompatible_block_size(format!(
                "8-byte index entries cannot be addressed in units of {}",
                self.index.block_size()
            ));
            let _ = self.index.close();
            let _ = self.next.close();
            return Err(failure);
        }
        if let Err(e) = BlockSize::new(self.record_size) {
            let _ = self.index.close();
            let _ = self.next.close();
            return Err(e);
        }

        self.comp_buf = vec![0u8; lz4_flex::block::get_maximum_output_size(self.record_size)];
        self.probe_buf = vec![0u8; self.record_size];
        self.plain_position = 0;
        self.comp_position = 0;
        self.index_position = 0;
        self.previous_read = true;
        self.last_write_full = false;
        self.eof = false;
        self.open = true;
        debug!(path = %path.display(), record_size = self.record_size, "opened lz4 stage");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        let record = self.record_size as u64;

        if offset == self.plain_position && offset % record != 0 {
            // Just past the final partial record.
            self.eof = true;
            return Ok(0);
        }
        if offset != self.plain_position && !self.seek_to(offset, false)? {
            self.eof = true;
            return Ok(0);
        }

        // Consume one index entry to stay in lockstep with sequential
        // reads; running out of index is the end of data.
        if self.previous_read {
            match self.index.read_u64_at(self.index_position)? {
                Some(_) => self.index_position += 8,
                None => {
                    self.eof = true;
                    return Ok(0);
                }
            }
        }
        self.previous_read = true;
        self.last_write_full = false;

        let comp_position = self.comp_position;
        let compressed_len = match self.next.read_sized(&mut self.comp_buf, comp_position)? {
            None => {
                self.eof = true;
                return Ok(0);
            }
            Some(n) => n,
        };
        self.comp_position += compressed_len as u64 + 4;

        let want = buf.len().min(self.record_size);
        let actual = if compressed_len == 0 {
            0
        } else {
            lz4_flex::block::decompress_into(&self.comp_buf[..compressed_len], &mut buf[..want])
                .map_err(|e| StackError::compression(format!("lz4 decompression failed: {}", e)))?
        };
        trace!(offset, compressed_len, actual, "lz4 read");

        self.plain_position = offset + actual as u64;
        self.eof = actual == 0;
        Ok(actual)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if !self.writable {
            return Err(StackError::not_supported("write on a read-only compressed file"));
        }
        let record = self.record_size as u64;

        if offset != self.plain_position {
            self.seek_to(offset, true)?;
        } else if offset % record != 0 {
            return Err(StackError::unaligned(
                "appending to a compressed file requires a buffered stage above it",
            ));
        }

        // A write after reads rewrites the current record's index entry so
        // index and data stay in lockstep.
        if self.previous_read {
            let entry = self.index_position;
            self.index.write_u64_at(self.comp_position, entry)?;
            self.index_position += 8;
            self.previous_read = false;
        }

        let len = buf.len().min(self.record_size);
        let compressed_len = if len == 0 {
            0
        } else {
            lz4_flex::block::compress_into(&buf[..len], &mut self.comp_buf)
                .map_err(|e| StackError::compression(format!("lz4 compression failed: {}", e)))?
        };

        let comp_position = self.comp_position;
        self.next.write_sized(&self.comp_buf[..compressed_len], comp_position)?;
        self.comp_position += compressed_len as u64 + 4;
        trace!(offset, len, compressed_len, "lz4 write");

        if len == self.record_size {
            // Mark where the next record will start.
            let entry = self.index_position;
            self.index.write_u64_at(self.comp_position, entry)?;
            self.index_position += 8;
            self.last_write_full = true;
        } else {
            self.last_write_full = false;
        }

        self.plain_position = offset + len as u64;
        Ok(len)
    }

    fn close(&mut self) -> Result<(), StackError> {
        let mut first_error: Option<StackError> = None;

        if self.open && self.writable && self.last_write_full {
            // Mark the end of data with an empty record, so readers find a
            // partial record even when every data record is full.
            let position = self.plain_position;
            debug!(position, "writing terminal empty record");
            if let Err(e) = self.write(&[], position) {
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.index.close() {
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.next.close() {
            first_error.get_or_insert(e);
        }

        self.comp_buf = Vec::new();
        self.probe_buf = Vec::new();
        self.open = false;
        self.writable = false;

        first_error.map_or(Ok(()), Err)
    }

    fn sync(&mut self) -> Result<(), StackError> {
        self.require_open()?;
        let index_sync = self.index.sync();
        let next_sync = self.next.sync();
        index_sync?;
        next_sync
    }

    fn truncate(&mut self, _offset: u64) -> Result<(), StackError> {
        Err(StackError::not_supported("truncate on a compressed file"))
    }

    fn size(&mut self) -> Result<u64, StackError> {
        self.require_open()?;

        let index_len = self.index.size()?;
        let records = index_len / 8;
        if records == 0 {
            // Empty file; position at the origin.
            self.comp_position = 0;
            self.index_position = 0;
            self.plain_position = 0;
            self.previous_read = true;
            return Ok(0);
        }

        // Read the record named by the last index entry. When every data
        // record is full, that entry points one past the end and the read
        // reports EOF, which counts as a zero-length final record.
        let record = self.record_size as u64;
        let last_offset = (records - 1) * record;
        if !self.seek_to(last_offset, false)? {
            return Ok(last_offset);
        }

        let probe_start = self.comp_position;
        let mut probe = std::mem::take(&mut self.probe_buf);
        let result = self.read(&mut probe, last_offset);
        self.probe_buf = probe;
        let last_len = result? as u64;

        // A stored empty record advances past its length prefix; a probe
        // that moved nothing hit end-of-file with no terminal record on
        // disk (interrupted writer).
        if last_len == 0 && self.comp_position == probe_start {
            warn!(
                last_offset,
                "no terminal record on disk; treating end-of-file as an empty final record"
            );
        }

        if last_len < record {
            // Reposition at the partial record so a subsequent write
            // overwrites it.
            self.seek_to(last_offset, false)?;
        }
        trace!(records, last_offset, last_len, "lz4 size probe");
        Ok(last_offset + last_len)
    }

    fn block_size(&self) -> usize {
        self.record_size
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(Lz4Stage::new(self.record_size, self.next.clone_stage()))
    }
}
