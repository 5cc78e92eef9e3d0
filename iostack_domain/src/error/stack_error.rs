// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the error carrier shared by every stage in the I/O
//! stack. It unifies the three failure channels of positioned I/O under a
//! single enum:
//!
//! - **System errors**: failures of the terminal stage's syscalls, carrying
//!   the OS errno. Non-sticky; the handle remains usable and the caller may
//!   retry.
//! - **Stack errors**: protocol violations between stages, such as hole
//!   creation, unaligned access, incompatible block sizes, malformed headers,
//!   or corrupted records.
//! - **Cryptographic errors**: failures reported by the cipher or compressor
//!   libraries, with the library's message attached.
//!
//! End-of-file is deliberately *not* an error. A read past the end returns
//! `Ok(0)` and sets the stage's EOF predicate; only real failures travel
//! through `StackError`.
//!
//! ## Design Principles
//!
//! - **Specific**: each variant represents one failure mode with a message
//!   carrying enough context to debug it.
//! - **Cloneable**: errors can be recorded and re-reported (for example, the
//!   close cascade returns the first error it saw while still releasing
//!   every resource).
//! - **Interoperable**: `std::io::Error` converts automatically and keeps
//!   its raw OS error code.

use thiserror::Error;

/// Errors produced by stages of the I/O stack.
///
/// Operations return `Result<_, StackError>`; an `Err` leaves the handle
/// usable unless the failure occurred during `open` (which closes the
/// partially opened chain before returning).
#[derive(Error, Debug, Clone)]
pub enum StackError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Incompatible block size: {0}")]
    IncompatibleBlockSize(String),

    #[error("Unaligned access: {0}")]
    UnalignedAccess(String),

    #[error("Would create a hole: {0}")]
    HoleDetected(String),

    #[error("Record corrupted: {0}")]
    CorruptRecord(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Stage is not open: {0}")]
    NotOpen(String),

    #[error("I/O error ({errno}): {message}")]
    Io { errno: i32, message: String },
}

impl StackError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new block-size negotiation error
    pub fn incompatible_block_size(msg: impl Into<String>) -> Self {
        Self::IncompatibleBlockSize(msg.into())
    }

    /// Creates a new alignment error
    pub fn unaligned(msg: impl Into<String>) -> Self {
        Self::UnalignedAccess(msg.into())
    }

    /// Creates a new hole-detection error
    pub fn hole(msg: impl Into<String>) -> Self {
        Self::HoleDetected(msg.into())
    }

    /// Creates a new corrupted-record error
    pub fn corrupt_record(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }

    /// Creates a new malformed-header error
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }

    /// Creates a new encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::EncryptionError(msg.into())
    }

    /// Creates a new integrity (authentication) error
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityError(msg.into())
    }

    /// Creates a new compression error
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::CompressionError(msg.into())
    }

    /// Creates a new unsupported-operation error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Creates a new not-open error
    pub fn not_open(msg: impl Into<String>) -> Self {
        Self::NotOpen(msg.into())
    }

    /// Creates a system error from an `std::io::Error`, keeping the errno
    /// and prefixing the message with the failing operation.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            errno: err.raw_os_error().unwrap_or(0),
            message: format!("{}: {}", context.into(), err),
        }
    }

    /// The OS error code, when this is a system error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Io { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Checks if the error indicates a transient condition worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Checks if the error indicates tampering or on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::IntegrityError(_) | Self::CorruptRecord(_) | Self::InvalidHeader(_)
        )
    }
}

impl From<std::io::Error> for StackError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            errno: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that system errors keep the raw OS error code.
    #[test]
    fn test_io_error_keeps_errno() {
        let io = std::io::Error::from_raw_os_error(libc_enoent());
        let err = StackError::io("open", io);
        assert_eq!(err.errno(), Some(libc_enoent()));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("open"));
    }

    /// Tests error categorization predicates.
    #[test]
    fn test_error_categories() {
        assert!(StackError::integrity("tag mismatch").is_corruption());
        assert!(StackError::corrupt_record("short record").is_corruption());
        assert!(!StackError::unaligned("offset 3").is_corruption());
        assert!(!StackError::hole("offset beyond end").is_recoverable());
        assert_eq!(StackError::invalid_config("bad").errno(), None);
    }

    // ENOENT without pulling in libc just for a test.
    fn libc_enoent() -> i32 {
        std::io::Error::from(std::io::ErrorKind::NotFound)
            .raw_os_error()
            .unwrap_or(2)
    }
}
