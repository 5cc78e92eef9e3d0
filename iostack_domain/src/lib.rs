// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # I/O Stack Domain
//!
//! The domain layer of the layered I/O stack: the contracts and value
//! objects every stage implementation builds on, with no I/O of its own.
//!
//! ## Module Structure
//!
//! - [`services`]: the [`Stage`] trait (one transformation in a pipeline of
//!   stages) and the [`StageExt`] helpers layered on it (whole-buffer
//!   loops, length-prefixed records, big-endian integers).
//! - [`error`]: the [`StackError`] carrier unifying system, stack, and
//!   cryptographic failures.
//! - [`value_objects`]: validated configuration primitives — [`BlockSize`],
//!   [`OpenFlags`], [`CipherAlgorithm`], [`EncryptionKey`].
//! - [`wire`]: big-endian field packing for the on-disk formats.
//!
//! ## The pipeline model
//!
//! Applications hold the top of a singly-linked chain of stages. Each stage
//! exposes the same positioned-I/O interface and exclusively owns its
//! successor: composition happens bottom-up at construction time, `open`
//! cascades top-down, and `close` releases the chain in the same order.
//! Stage implementations live in the companion `iostack` crate; anything
//! that honors the contract here is a first-class member of a pipeline.

pub mod error;
pub mod services;
pub mod value_objects;
pub mod wire;

// Re-export commonly used types at the crate root
pub use error::StackError;
pub use services::stage::{Stage, StageExt, MAX_BLOCK_SIZE};
pub use value_objects::block_size::BlockSize;
pub use value_objects::cipher_algorithm::CipherAlgorithm;
pub use value_objects::encryption_key::EncryptionKey;
pub use value_objects::open_flags::{AccessMode, OpenFlags};
