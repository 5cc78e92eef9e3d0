// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Handle and Builder
//!
//! [`IoStack`] wraps the topmost stage of a pipeline and is what
//! applications hold. Its read and write calls loop internally, so callers
//! get whole-buffer semantics without caring about the block sizes
//! negotiated below.
//!
//! [`StackBuilder`] composes pipelines bottom-up. Start from a terminal
//! stage and wrap transformations around it; the last wrap is the top of
//! the stack:
//!
//! ```no_run
//! use iostack::stack::StackBuilder;
//! use iostack_domain::{CipherAlgorithm, EncryptionKey, OpenFlags};
//!
//! let key = EncryptionKey::new(vec![0u8; 32]);
//! let mut stack = StackBuilder::posix()
//!     .aead(CipherAlgorithm::Aes256Gcm, key, 1024)
//!     .buffered(16 * 1024)
//!     .build();
//! stack.open("/tmp/secret.dat", &OpenFlags::read_write().with_create(true))?;
//! stack.write_at(b"hello", 0)?;
//! stack.close()?;
//! # Ok::<(), iostack_domain::StackError>(())
//! ```

use std::path::Path;

use iostack_domain::{CipherAlgorithm, EncryptionKey, OpenFlags, Stage, StageExt, StackError};

use crate::stages::{AeadStage, BufferedStage, FileSetStage, Lz4Stage, MemoryStage, PosixFileStage};

/// Application-facing handle for a pipeline of stages.
pub struct IoStack {
    top: Box<dyn Stage>,
}

impl IoStack {
    /// Wraps a composed pipeline; `top` is the topmost stage.
    pub fn new(top: Box<dyn Stage>) -> Self {
        Self { top }
    }

    /// Opens the pipeline top-down.
    pub fn open(&mut self, path: impl AsRef<Path>, flags: &OpenFlags) -> Result<(), StackError> {
        self.top.open(path.as_ref(), flags)
    }

    /// Reads as much of `buf` as the file holds at `offset`. Returns the
    /// byte count; `Ok(0)` means end-of-file.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.top.read_all(buf, offset)
    }

    /// Writes all of `buf` at `offset`.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.top.write_all(buf, offset)
    }

    /// The logical file size.
    pub fn size(&mut self) -> Result<u64, StackError> {
        self.top.size()
    }

    /// Flushes every stage, then makes the writes durable.
    pub fn sync(&mut self) -> Result<(), StackError> {
        self.top.sync()
    }

    /// Truncates at `offset`, where the top stage supports it.
    pub fn truncate(&mut self, offset: u64) -> Result<(), StackError> {
        self.top.truncate(offset)
    }

    /// Whether the most recent read hit end-of-file.
    pub fn eof(&self) -> bool {
        self.top.eof()
    }

    /// The alignment unit the top stage expects from the application
    /// (1 when a buffered stage is on top).
    pub fn block_size(&self) -> usize {
        self.top.block_size()
    }

    /// Flushes and closes the pipeline, releasing every stage's
    /// resources. The handle must not be used afterwards.
    pub fn close(&mut self) -> Result<(), StackError> {
        self.top.close()
    }
}

/// Bottom-up composition of pipelines.
pub struct StackBuilder {
    stage: Box<dyn Stage>,
}

impl StackBuilder {
    /// Starts from a Posix file terminal stage.
    pub fn posix() -> Self {
        Self {
            stage: Box::new(PosixFileStage::new()),
        }
    }

    /// Starts from an in-memory terminal stage (test support).
    pub fn memory() -> Self {
        Self {
            stage: Box::new(MemoryStage::new()),
        }
    }

    /// Starts from an arbitrary terminal stage.
    pub fn from_stage(stage: Box<dyn Stage>) -> Self {
        Self { stage }
    }

    /// Splits the file into `segment_size`-byte segment files.
    pub fn split(mut self, segment_size: u64) -> Self {
        self.stage = Box::new(FileSetStage::new(segment_size, self.stage));
        self
    }

    /// Compresses `record_size`-byte records with LZ4 plus a sidecar seek
    /// index.
    pub fn lz4(mut self, record_size: usize) -> Self {
        self.stage = Box::new(Lz4Stage::new(record_size, self.stage));
        self
    }

    /// Encrypts `record_size`-byte records with the given AEAD cipher.
    pub fn aead(mut self, algorithm: CipherAlgorithm, key: EncryptionKey, record_size: usize) -> Self {
        self.stage = Box::new(AeadStage::new(algorithm, key, record_size, self.stage));
        self
    }

    /// Puts byte-level buffering on top, absorbing alignment below.
    pub fn buffered(mut self, suggested_size: usize) -> Self {
        self.stage = Box::new(BufferedStage::new(suggested_size, self.stage));
        self
    }

    /// Finishes composition; the most recently added stage is the top.
    pub fn build(self) -> IoStack {
        IoStack::new(self.stage)
    }
}
