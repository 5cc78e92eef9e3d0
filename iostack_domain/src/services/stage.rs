// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Contract
//!
//! The central abstraction of the I/O stack: a [`Stage`] is one
//! transformation in a pipeline of stages that together present a single
//! file-like handle. Each stage exclusively owns its successor; pipelines
//! are composed bottom-up at construction time and opened top-down.
//!
//! ## The positioned-I/O model
//!
//! Every read and write carries an explicit byte offset. Stages keep no
//! current-position cursor, so there is no seek operation in the hot path
//! and no hidden state to desynchronize. A handle supports at most one
//! outstanding operation at a time; independent handles (each its own
//! chain of stages) may coexist freely.
//!
//! ## Block sizes
//!
//! After a successful `open`, each stage publishes a `block_size`: the unit
//! in which its predecessor must address and size I/O, except for a final
//! partial block at end-of-file. A stage that buffers publishes 1. A stage
//! that frames fixed-size records (encryption, compression) publishes its
//! plaintext record size and checks its successor's block size for
//! compatibility during `open`.
//!
//! ## End-of-file
//!
//! EOF is not an error: a read at or past the end returns `Ok(0)` and sets
//! the stage's [`Stage::eof`] predicate. Framing stages distinguish EOF
//! from a full record by requiring the on-disk file to end with a partial
//! (possibly empty) record.
//!
//! ## Helpers
//!
//! [`StageExt`] layers looping and framing helpers over the contract:
//! whole-buffer reads and writes, 4-byte length-prefixed records, and
//! 8-byte big-endian integers. These are conveniences for callers and for
//! the stages themselves (a framing stage reads its successor through
//! `read_all`); they are not part of the per-stage contract and cannot be
//! overridden.

use std::path::Path;

use crate::error::StackError;
use crate::value_objects::open_flags::OpenFlags;

/// Upper limit on block sizes and sized-record lengths (16 MiB).
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// One transformation in a pipeline of stages.
///
/// A stage may service an operation itself or delegate it to the single
/// successor it owns. Between a successful `open` and the matching `close`
/// the stage may be invoked any number of times; outside that window only
/// `open`, `close`, and drop are legal. A closed stage is not reusable;
/// [`Stage::clone_stage`] produces a fresh, unopened chain with the same
/// configuration for callers that need to open a parallel pipeline.
pub trait Stage: Send {
    /// Opens the stage and, cascading, its successors.
    ///
    /// A stage may internally upgrade a write-only request to read-write
    /// when it has to read-modify-write (buffering) or read its own header
    /// (framing). On failure, every resource acquired so far is released
    /// and the successor is closed before the error is returned.
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError>;

    /// Positioned read. `Ok(0)` means end-of-file.
    ///
    /// `offset` and `buf.len()` must be multiples of this stage's block
    /// size, except that the final block of the file may be partial. A
    /// single call may return fewer bytes than requested; callers loop with
    /// [`StageExt::read_all`].
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError>;

    /// Positioned write, aligned like [`Stage::read`]. A partial block is
    /// only permitted as the final block of the file. May write fewer bytes
    /// than requested; callers loop with [`StageExt::write_all`].
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError>;

    /// Flushes, closes the successor, and releases resources.
    ///
    /// Close swallows no errors: it finishes releasing everything and then
    /// returns the first error encountered along the way.
    fn close(&mut self) -> Result<(), StackError>;

    /// Flushes any buffered data, then delegates to the successor. After a
    /// successful sync, all previously successful writes are durable.
    fn sync(&mut self) -> Result<(), StackError>;

    /// Truncates the file at `offset`, which must align to this stage's
    /// block size. Framing stages may refuse with `NotSupported`.
    fn truncate(&mut self, offset: u64) -> Result<(), StackError>;

    /// The logical file size in this stage's offset space. For framing
    /// stages this may require reading and decoding the final record.
    fn size(&mut self) -> Result<u64, StackError>;

    /// The alignment unit this stage requires of its predecessor. Valid
    /// after a successful `open`.
    fn block_size(&self) -> usize;

    /// Whether the most recent read hit end-of-file.
    fn eof(&self) -> bool;

    /// A fresh, unopened stage chain with the same configuration.
    fn clone_stage(&self) -> Box<dyn Stage>;
}

/// Looping and framing helpers layered over the [`Stage`] contract.
pub trait StageExt: Stage {
    /// Reads until `buf` is full, end-of-file, or error.
    ///
    /// Stops early after a partial read that does not land on a block
    /// boundary, because a partial block can only be the last one in the
    /// file. Returns the total number of bytes read; `Ok(0)` means
    /// end-of-file.
    fn read_all(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        let mut total = 0usize;
        while total < buf.len() {
            // A partial block is always the last one.
            if total % self.block_size() != 0 {
                break;
            }
            let actual = self.read(&mut buf[total..], offset + total as u64)?;
            if actual == 0 {
                break;
            }
            total += actual;
        }
        Ok(total)
    }

    /// Writes the whole of `buf`, looping over partial writes. Returns the
    /// number of bytes written, which is `buf.len()` unless a stage
    /// reported a zero-length write.
    fn write_all(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        let mut total = 0usize;
        while total < buf.len() {
            let actual = self.write(&buf[total..], offset + total as u64)?;
            if actual == 0 {
                break;
            }
            total += actual;
        }
        Ok(total)
    }

    /// Writes a length-prefixed record: a 4-byte big-endian length followed
    /// by the record bytes. Returns the record length.
    fn write_sized(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        if buf.len() > MAX_BLOCK_SIZE {
            return Err(StackError::corrupt_record(format!(
                "sized record of {} bytes exceeds the {} byte limit",
                buf.len(),
                MAX_BLOCK_SIZE
            )));
        }
        self.write_all(&(buf.len() as u32).to_be_bytes(), offset)?;
        self.write_all(buf, offset + 4)?;
        Ok(buf.len())
    }

    /// Reads a length-prefixed record written by [`StageExt::write_sized`].
    ///
    /// Returns `Ok(None)` at end-of-file and `Ok(Some(len))` otherwise;
    /// `len` may be zero for an empty record. A record whose bytes cannot
    /// be read in full is reported as corrupted.
    fn read_sized(&mut self, buf: &mut [u8], offset: u64) -> Result<Option<usize>, StackError> {
        let mut len_bytes = [0u8; 4];
        let actual = self.read_all(&mut len_bytes, offset)?;
        if actual == 0 {
            return Ok(None);
        }
        if actual != 4 {
            return Err(StackError::corrupt_record(
                "record length field is truncated",
            ));
        }

        let expected = u32::from_be_bytes(len_bytes) as usize;
        if expected > MAX_BLOCK_SIZE {
            return Err(StackError::corrupt_record(format!(
                "record length {} exceeds the {} byte limit",
                expected, MAX_BLOCK_SIZE
            )));
        }
        if expected > buf.len() {
            return Err(StackError::corrupt_record(format!(
                "record of {} bytes exceeds the {} byte buffer",
                expected,
                buf.len()
            )));
        }

        let actual = self.read_all(&mut buf[..expected], offset + 4)?;
        if actual != expected {
            return Err(StackError::corrupt_record(format!(
                "expected {} bytes but read only {}",
                expected, actual
            )));
        }
        Ok(Some(expected))
    }

    /// Reads an 8-byte big-endian integer, `Ok(None)` at end-of-file.
    fn read_u64_at(&mut self, offset: u64) -> Result<Option<u64>, StackError> {
        let mut bytes = [0u8; 8];
        let actual = self.read_all(&mut bytes, offset)?;
        if actual == 0 {
            return Ok(None);
        }
        if actual != 8 {
            return Err(StackError::corrupt_record("truncated 8-byte field"));
        }
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    /// Writes an 8-byte big-endian integer.
    fn write_u64_at(&mut self, value: u64, offset: u64) -> Result<(), StackError> {
        self.write_all(&value.to_be_bytes(), offset)?;
        Ok(())
    }
}

impl<S: Stage + ?Sized> StageExt for S {}
