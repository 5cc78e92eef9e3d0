// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Open Flags Value Object
//!
//! A typed rendering of the Posix open flags the stack understands:
//! access mode (read, write, or both), create, truncate, append, and the
//! permission bits applied when a file is created.
//!
//! The flags travel down the pipeline unchanged except where a stage has a
//! documented reason to adjust its own copy: buffering and framing stages
//! upgrade write-only to read-write because they must read back what is on
//! disk (read-modify-write, headers, size probes), and a splitting stage
//! strips truncation for every segment after the first.

use serde::{Deserialize, Serialize};

/// Requested access to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Posix-style open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    access: AccessMode,
    create: bool,
    truncate: bool,
    append: bool,
    mode: u32,
}

impl OpenFlags {
    const DEFAULT_MODE: u32 = 0o666;

    pub fn read_only() -> Self {
        Self::with_access(AccessMode::ReadOnly)
    }

    pub fn write_only() -> Self {
        Self::with_access(AccessMode::WriteOnly)
    }

    pub fn read_write() -> Self {
        Self::with_access(AccessMode::ReadWrite)
    }

    fn with_access(access: AccessMode) -> Self {
        Self {
            access,
            create: false,
            truncate: false,
            append: false,
            mode: Self::DEFAULT_MODE,
        }
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Permission bits used when creating the file.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn readable(&self) -> bool {
        self.access != AccessMode::WriteOnly
    }

    pub fn writable(&self) -> bool {
        self.access != AccessMode::ReadOnly
    }

    pub fn create(&self) -> bool {
        self.create
    }

    pub fn truncate(&self) -> bool {
        self.truncate
    }

    pub fn append(&self) -> bool {
        self.append
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// A copy with write-only upgraded to read-write. Stages that must
    /// read back their own output (buffering, framing) pass this downward.
    pub fn upgraded_to_read_write(&self) -> Self {
        let mut flags = *self;
        if flags.access == AccessMode::WriteOnly {
            flags.access = AccessMode::ReadWrite;
        }
        flags
    }

    /// A copy without truncation (segments after the first).
    pub fn without_truncate(&self) -> Self {
        let mut flags = *self;
        flags.truncate = false;
        flags
    }

    /// A copy without the append request (terminal stages do positioned
    /// writes, which kernel-side append would redirect).
    pub fn without_append(&self) -> Self {
        let mut flags = *self;
        flags.append = false;
        flags
    }
}
