// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Posix Terminal Stage
//!
//! The bottom of a pipeline: a thin wrapper around positioned system calls
//! on a Posix file. Reads and writes map to `pread`/`pwrite` (via
//! [`std::os::unix::fs::FileExt`]), sync to `fdatasync`, truncate to
//! `ftruncate`, and size to `fstat`. The stage owns the file descriptor and
//! is the last one closed.
//!
//! `O_APPEND` is stripped before opening: kernel-side append redirects
//! every write to the end of the file, which would corrupt positioned
//! writes issued by the stages above. Callers that want append semantics
//! compose a Buffered stage and write at the file size.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use tracing::{debug, trace, warn};

use iostack_domain::{OpenFlags, Stage, StackError};

/// Terminal stage performing positioned syscalls on a Posix file.
pub struct PosixFileStage {
    file: Option<File>,
    writable: bool,
    eof: bool,
}

impl PosixFileStage {
    pub fn new() -> Self {
        Self {
            file: None,
            writable: false,
            eof: false,
        }
    }

    fn file(&self) -> Result<&File, StackError> {
        self.file
            .as_ref()
            .ok_or_else(|| StackError::not_open("posix file stage"))
    }
}

impl Default for PosixFileStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for PosixFileStage {
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        // pread/pwrite ignore the cursor, but O_APPEND would not ignore them.
        let flags = flags.without_append();
        self.writable = flags.writable();

        let file = OpenOptions::new()
            .read(flags.readable())
            .write(flags.writable())
            .create(flags.create())
            .truncate(flags.truncate())
            .mode(flags.mode())
            .open(path)
            .map_err(|e| StackError::io(format!("open {}", path.display()), e))?;
        debug!(path = %path.display(), writable = self.writable, "opened posix file");

        self.file = Some(file);
        self.eof = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        let file = self.file()?;
        let actual = loop {
            match file.read_at(buf, offset) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    warn!(offset, "pread interrupted; retrying");
                    continue;
                }
                Err(e) => return Err(StackError::io("pread", e)),
            }
        };
        trace!(offset, requested = buf.len(), actual, "pread");
        self.eof = actual == 0;
        Ok(actual)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        let file = self.file()?;
        let actual = loop {
            match file.write_at(buf, offset) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    warn!(offset, "pwrite interrupted; retrying");
                    continue;
                }
                Err(e) => return Err(StackError::io("pwrite", e)),
            }
        };
        trace!(offset, requested = buf.len(), actual, "pwrite");
        Ok(actual)
    }

    fn close(&mut self) -> Result<(), StackError> {
        if let Some(file) = self.file.take() {
            debug!("closing posix file");
            drop(file);
        }
        self.writable = false;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StackError> {
        if self.writable {
            self.file()?
                .sync_data()
                .map_err(|e| StackError::io("fdatasync", e))?;
        }
        Ok(())
    }

    fn truncate(&mut self, offset: u64) -> Result<(), StackError> {
        self.file()?
            .set_len(offset)
            .map_err(|e| StackError::io("ftruncate", e))
    }

    fn size(&mut self) -> Result<u64, StackError> {
        let size = self
            .file()?
            .metadata()
            .map_err(|e| StackError::io("fstat", e))?
            .len();
        trace!(size, "posix file size");
        Ok(size)
    }

    fn block_size(&self) -> usize {
        1
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(PosixFileStage::new())
    }
}
