// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Block Size Value Object
//!
//! A validated alignment unit for stage I/O. Stages negotiate block sizes
//! during `open`; this type enforces the bounds once so every stage can
//! rely on them, and carries the alignment arithmetic (round up, round
//! down, alignment test) that block-structured code needs everywhere.
//!
//! ## Constraints
//!
//! - **Minimum (1 byte)**: a block size of 1 means "no alignment
//!   constraint" and is what buffering and terminal stages publish.
//! - **Maximum (16 MiB)**: bounds record sizes and sized-record lengths so
//!   a corrupted length field cannot drive an allocation of arbitrary
//!   size.

use serde::{Deserialize, Serialize};

use crate::error::StackError;
use crate::services::stage::MAX_BLOCK_SIZE;

/// A validated block size.
///
/// Two block sizes are equal if they have the same byte count; the value is
/// immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize {
    bytes: usize,
}

impl BlockSize {
    /// Smallest permitted block size: byte-stream granularity.
    pub const MIN: usize = 1;

    /// Largest permitted block size.
    pub const MAX: usize = MAX_BLOCK_SIZE;

    /// Creates a block size, validating the bounds.
    pub fn new(bytes: usize) -> Result<Self, StackError> {
        if bytes < Self::MIN || bytes > Self::MAX {
            return Err(StackError::invalid_config(format!(
                "block size {} is outside {}..={}",
                bytes,
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self { bytes })
    }

    /// Byte-stream granularity: no alignment constraint.
    pub fn byte_stream() -> Self {
        Self { bytes: 1 }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether `offset` lands on a block boundary.
    pub fn is_aligned(&self, offset: u64) -> bool {
        offset % self.bytes as u64 == 0
    }

    /// `value` rounded down to a block boundary.
    pub fn round_down(&self, value: u64) -> u64 {
        value / self.bytes as u64 * self.bytes as u64
    }

    /// `value` rounded up to a block boundary.
    pub fn round_up(&self, value: u64) -> u64 {
        self.round_down(value + self.bytes as u64 - 1)
    }
}

impl std::fmt::Display for BlockSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.bytes)
    }
}

impl TryFrom<usize> for BlockSize {
    type Error = StackError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}
