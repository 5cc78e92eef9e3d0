// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage implementations.
//!
//! Terminal stages ([`file`], [`memory`]) sit at the bottom of a pipeline
//! and publish a block size of 1. Mid-stack stages transform I/O on the
//! way down: [`buffered`] reconciles byte calls with block-aligned
//! successors, [`aead`] and [`lz4`] frame fixed-size records (encrypted
//! and compressed respectively), and [`split`] fans a logical file out
//! over segment files.

pub mod aead;
pub mod buffered;
pub mod file;
pub mod lz4;
pub mod memory;
pub mod split;

pub use aead::AeadStage;
pub use buffered::BufferedStage;
pub use file::PosixFileStage;
pub use lz4::Lz4Stage;
pub use memory::MemoryStage;
pub use split::{FileSetStage, SegmentPathFn};
