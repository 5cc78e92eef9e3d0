// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File-Splitting Stage
//!
//! Presents a group of segment files as a single logical file. Splitting
//! keeps individual files small enough to manage, and a path formatter can
//! spread segments across directories to balance disk access.
//!
//! Segment `k` holds offsets `k * segment_size .. (k + 1) * segment_size`.
//! An operation is capped at the segment boundary; callers loop, so a
//! transfer crossing a boundary simply arrives as two calls. Each segment
//! is served by a fresh clone of the successor chain (a chain is opened at
//! most once), and segments after the first are opened with create enabled
//! and truncation stripped.
//!
//! A group always terminates with a partially filled segment; when every
//! segment is full, an empty trailing segment marks the end, created at
//! close when needed. The size probe walks segments in order until it
//! finds the partial one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use iostack_domain::{OpenFlags, Stage, StackError};

/// Computes the path of segment `index` from the logical path.
pub type SegmentPathFn = Arc<dyn Fn(&Path, u32) -> PathBuf + Send + Sync>;

fn default_segment_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("-{:06}.seg", index));
    PathBuf::from(name)
}

/// A group of segment files behind a single-file interface.
pub struct FileSetStage {
    segment_size: u64,
    /// Unopened prototype chain, cloned once per segment.
    template: Box<dyn Stage>,
    path_fn: SegmentPathFn,

    current: Option<Box<dyn Stage>>,
    current_index: u32,
    base_path: PathBuf,
    /// Flags for segments after the first.
    segment_flags: OpenFlags,

    block: usize,
    writable: bool,
    open: bool,
    eof: bool,
}

impl FileSetStage {
    /// Creates a splitting stage over `next`, with `segment_size` bytes
    /// per segment and the default `-NNNNNN.seg` naming.
    pub fn new(segment_size: u64, next: Box<dyn Stage>) -> Self {
        Self {
            segment_size,
            template: next,
            path_fn: Arc::new(default_segment_path),
            current: None,
            current_index: 0,
            base_path: PathBuf::new(),
            segment_flags: OpenFlags::read_only(),
            block: 1,
            writable: false,
            open: false,
            eof: false,
        }
    }

    /// Replaces the segment naming scheme.
    pub fn with_path_fn(mut self, path_fn: SegmentPathFn) -> Self {
        self.path_fn = path_fn;
        self
    }

    fn require_open(&self) -> Result<(), StackError> {
        if self.open {
            Ok(())
        } else {
            Err(StackError::not_open("file set stage"))
        }
    }

    /// Closes the current segment and opens `index` through a fresh clone
    /// of the template chain.
    fn open_segment(&mut self, index: u32, flags: &OpenFlags) -> Result<(), StackError> {
        if let Some(mut old) = self.current.take() {
            old.close()?;
        }
        let path = (self.path_fn)(&self.base_path, index);
        trace!(index, path = %path.display(), "switching segment");
        let mut segment = self.template.clone_stage();
        segment.open(&path, flags)?;
        self.current = Some(segment);
        self.current_index = index;
        Ok(())
    }

    fn current(&mut self) -> Result<&mut Box<dyn Stage>, StackError> {
        self.current
            .as_mut()
            .ok_or_else(|| StackError::not_open("file set segment"))
    }

    /// Makes sure the segment containing `offset` is the open one, and
    /// returns the local offset and the transfer cap within the segment.
    fn position(&mut self, offset: u64, size: usize) -> Result<(u64, usize), StackError> {
        let index = (offset / self.segment_size) as u32;
        if self.current.is_none() || index != self.current_index {
            let flags = self.segment_flags;
            self.open_segment(index, &flags)?;
        }
        let local = offset % self.segment_size;
        let cap = size.min((self.segment_size - local) as usize);
        Ok((local, cap))
    }
}

impl Stage for FileSetStage {
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        if flags.append() {
            return Err(StackError::not_supported(
                "appending to a file set requires a buffered stage above it",
            ));
        }
        self.writable = flags.writable();
        self.base_path = path.to_path_buf();

        // The first segment honors the caller's flags; later segments may
        // need creating and must never be truncated.
        self.open_segment(0, flags)?;
        let mut later = *flags;
        if flags.writable() {
            later = later.with_create(true);
        }
        self.segment_flags = later.without_truncate();

        // Pass the successor's alignment through; segments must hold whole
        // blocks.
        self.block = self.current()?.block_size();
        if self.segment_size == 0 || self.segment_size % self.block as u64 != 0 {
            let failure = StackError::incompatible_block_size(format!(
                "segment size {} is not a multiple of the successor block size {}",
                self.segment_size, self.block
            ));
            if let Some(mut segment) = self.current.take() {
                let _ = segment.close();
            }
            return Err(failure);
        }

        debug!(
            path = %path.display(),
            segment_size = self.segment_size,
            "opened file set"
        );
        self.eof = false;
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let (local, cap) = self.position(offset, buf.len())?;
        let actual = self.current()?.read(&mut buf[..cap], local)?;
        // The group ends inside its one partial segment, so a segment EOF
        // is the group EOF.
        self.eof = actual == 0;
        Ok(actual)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if !self.writable {
            return Err(StackError::not_supported("write on a read-only file set"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let (local, cap) = self.position(offset, buf.len())?;
        self.current()?.write(&buf[..cap], local)
    }

    fn close(&mut self) -> Result<(), StackError> {
        let mut first_error: Option<StackError> = None;

        if self.open && self.writable {
            // Keep the invariant that the group ends with a partial
            // segment: a full final segment gets an empty successor.
            match self.current().and_then(|segment| segment.size()) {
                Ok(size) if size == self.segment_size => {
                    let next_index = self.current_index + 1;
                    let flags = self.segment_flags;
                    debug!(next_index, "creating trailing empty segment");
                    if let Err(e) = self.open_segment(next_index, &flags) {
                        first_error.get_or_insert(e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(mut segment) = self.current.take() {
            if let Err(e) = segment.close() {
                first_error.get_or_insert(e);
            }
        }
        self.open = false;
        self.writable = false;

        first_error.map_or(Ok(()), Err)
    }

    fn sync(&mut self) -> Result<(), StackError> {
        self.require_open()?;
        self.current()?.sync()
    }

    fn truncate(&mut self, _offset: u64) -> Result<(), StackError> {
        Err(StackError::not_supported("truncate on a file set"))
    }

    fn size(&mut self) -> Result<u64, StackError> {
        self.require_open()?;

        // Push current writes down so probe clones see them.
        self.current()?.sync()?;

        // Walk the segments until the terminating partial one.
        let mut index = 0u32;
        loop {
            let path = (self.path_fn)(&self.base_path, index);
            let mut probe = self.template.clone_stage();
            if let Err(e) = probe.open(&path, &OpenFlags::read_only()) {
                // A missing segment terminates the group (a crash can lose
                // the trailing empty segment).
                if index == 0 {
                    return Err(e);
                }
                warn!(
                    index,
                    path = %path.display(),
                    "segment missing; treating it as the end of the group"
                );
                return Ok(u64::from(index) * self.segment_size);
            }
            let segment_len = probe.size();
            let _ = probe.close();
            let segment_len = segment_len?;
            if segment_len < self.segment_size {
                return Ok(u64::from(index) * self.segment_size + segment_len);
            }
            index += 1;
        }
    }

    fn block_size(&self) -> usize {
        self.block
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(
            FileSetStage::new(self.segment_size, self.template.clone_stage())
                .with_path_fn(self.path_fn.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::file::PosixFileStage;
    use iostack_domain::StageExt;
    use tempfile::TempDir;

    const SEGMENT: u64 = 64;

    fn open_set(dir: &TempDir) -> FileSetStage {
        let mut stage = FileSetStage::new(SEGMENT, Box::new(PosixFileStage::new()));
        stage
            .open(
                &dir.path().join("set.dat"),
                &OpenFlags::read_write().with_create(true).with_truncate(true),
            )
            .unwrap();
        stage
    }

    /// Tests that data spanning several segments round-trips and lands in
    /// separate files.
    #[test]
    fn test_spanning_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut stage = open_set(&dir);

        let data: Vec<u8> = (0..200).map(|i| i as u8).collect();
        assert_eq!(stage.write_all(&data, 0).unwrap(), 200);
        assert_eq!(stage.size().unwrap(), 200);

        let mut buf = vec![0u8; 200];
        assert_eq!(stage.read_all(&mut buf, 0).unwrap(), 200);
        assert_eq!(buf, data);
        stage.close().unwrap();

        // 200 bytes over 64-byte segments: three full files plus one
        // partial.
        for (index, expected) in [(0u32, 64u64), (1, 64), (2, 64), (3, 8)] {
            let path = dir.path().join(format!("set.dat-{:06}.seg", index));
            assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
        }
    }

    /// Tests the trailing empty segment after an exactly-full group.
    #[test]
    fn test_trailing_empty_segment() {
        let dir = TempDir::new().unwrap();
        let mut stage = open_set(&dir);
        stage.write_all(&[7u8; 128], 0).unwrap();
        stage.close().unwrap();

        let trailer = dir.path().join("set.dat-000002.seg");
        assert_eq!(std::fs::metadata(&trailer).unwrap().len(), 0);

        // Reopen and check the probe stops at the empty trailer.
        let mut stage = FileSetStage::new(SEGMENT, Box::new(PosixFileStage::new()));
        stage
            .open(&dir.path().join("set.dat"), &OpenFlags::read_only())
            .unwrap();
        assert_eq!(stage.size().unwrap(), 128);
        let mut buf = [0u8; 64];
        assert_eq!(stage.read(&mut buf, 128).unwrap(), 0);
        assert!(stage.eof());
        stage.close().unwrap();
    }

    /// Tests that transfers are capped at segment boundaries.
    #[test]
    fn test_boundary_capping() {
        let dir = TempDir::new().unwrap();
        let mut stage = open_set(&dir);
        stage.write_all(&[1u8; 100], 0).unwrap();

        let mut buf = [0u8; 100];
        // A single call starting mid-segment stops at the boundary.
        assert_eq!(stage.read(&mut buf, 32).unwrap(), 32);
        stage.close().unwrap();
    }
}
