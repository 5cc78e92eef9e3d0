// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Layered I/O Stack
//!
//! A composable, random-access I/O stack: applications see a single
//! file-like handle, but the handle is the head of a pipeline of pluggable
//! stages that transform bytes on the way to and from a backing store.
//!
//! ```text
//! application
//!      |
//! [ Buffered ]   byte offsets, read-modify-write cache
//!      |
//! [ AEAD ]       fixed records -> authenticated ciphertext records
//!      |
//! [ LZ4 ]        fixed records -> sized compressed records + .idx sidecar
//!      |
//! [ FileSet ]    one logical file -> numbered segment files
//!      |
//! [ PosixFile ]  pread/pwrite/fdatasync/ftruncate
//! ```
//!
//! Every stage implements the same positioned-I/O contract
//! ([`iostack_domain::Stage`]); any subset composes, as long as the block
//! sizes negotiated at open time are compatible. See [`stack::StackBuilder`]
//! for the common arrangements.
//!
//! ## Guarantees
//!
//! - All I/O is positioned; handles carry no cursor and no seek state.
//! - Writes that would create a hole are refused.
//! - Encrypted files are self-describing (parameters live in an
//!   authenticated header; only the key is external) and any bit flip in
//!   a record or its tag is detected on read.
//! - Compressed files support record-aligned random access through the
//!   sidecar index.
//!
//! ## Non-goals
//!
//! A handle is not safe for concurrent use; at most one operation may be
//! outstanding. There is no shared cache across handles and no
//! transactional rollback; `sync` is the only durability primitive.

pub mod stack;
pub mod stages;

pub use stack::{IoStack, StackBuilder};
pub use stages::{AeadStage, BufferedStage, FileSetStage, Lz4Stage, MemoryStage, PosixFileStage};

// Re-export the domain contract so applications need only one import.
pub use iostack_domain::{
    AccessMode, BlockSize, CipherAlgorithm, EncryptionKey, OpenFlags, Stage, StageExt, StackError,
    MAX_BLOCK_SIZE,
};
