// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Terminal Stage
//!
//! A terminal stage backed by a `Vec<u8>` with Posix-like semantics:
//! writes past the current end zero-fill the gap, reads at the end report
//! EOF. Unit tests compose real mid-stack stages over this one to exercise
//! buffering, framing, and error paths without touching the filesystem.
//!
//! The backing buffer belongs to the stage instance, so a cloned chain
//! (for example an LZ4 sidecar) writes to its own buffer, and the contents
//! do not survive a close/reopen cycle. Tests that need persistence across
//! reopen use [`super::file::PosixFileStage`] with a temp directory.

use std::path::Path;

use iostack_domain::{OpenFlags, Stage, StackError};

/// Terminal stage over an in-memory buffer.
pub struct MemoryStage {
    data: Vec<u8>,
    open: bool,
    eof: bool,
}

impl MemoryStage {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            open: false,
            eof: false,
        }
    }

    /// The current backing bytes, for test assertions.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    fn require_open(&self) -> Result<(), StackError> {
        if self.open {
            Ok(())
        } else {
            Err(StackError::not_open("memory stage"))
        }
    }
}

impl Default for MemoryStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MemoryStage {
    fn open(&mut self, _path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        if flags.truncate() {
            self.data.clear();
        }
        self.open = true;
        self.eof = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        let offset = offset as usize;
        if offset >= self.data.len() {
            self.eof = true;
            return Ok(0);
        }
        let actual = buf.len().min(self.data.len() - offset);
        buf[..actual].copy_from_slice(&self.data[offset..offset + actual]);
        self.eof = false;
        Ok(actual)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > self.data.len() {
            // pwrite past the end zero-fills the gap
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<(), StackError> {
        self.open = false;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StackError> {
        self.require_open()
    }

    fn truncate(&mut self, offset: u64) -> Result<(), StackError> {
        self.require_open()?;
        self.data.resize(offset as usize, 0);
        Ok(())
    }

    fn size(&mut self) -> Result<u64, StackError> {
        self.require_open()?;
        Ok(self.data.len() as u64)
    }

    fn block_size(&self) -> usize {
        1
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(MemoryStage::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iostack_domain::StageExt;

    /// Tests Posix-like zero-fill for writes past the end.
    #[test]
    fn test_sparse_write_zero_fills() {
        let mut stage = MemoryStage::new();
        stage.open(Path::new("mem"), &OpenFlags::read_write()).unwrap();

        stage.write_all(b"xy", 4).unwrap();
        assert_eq!(stage.contents(), &[0, 0, 0, 0, b'x', b'y']);
        assert_eq!(stage.size().unwrap(), 6);
    }

    /// Tests EOF reporting at and past the end.
    #[test]
    fn test_eof_at_end() {
        let mut stage = MemoryStage::new();
        stage.open(Path::new("mem"), &OpenFlags::read_write()).unwrap();
        stage.write_all(b"abc", 0).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(stage.read(&mut buf, 3).unwrap(), 0);
        assert!(stage.eof());
        assert_eq!(stage.read(&mut buf, 0).unwrap(), 3);
        assert!(!stage.eof());
    }
}
