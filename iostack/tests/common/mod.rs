// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared helpers for the integration suites.
//!
//! Test files hold the same line of text repeated over and over, which
//! makes failures easy to inspect with a text editor, does not align with
//! typical block sizes, and compresses well.

#![allow(dead_code)]

use std::path::Path;

use iostack::{IoStack, OpenFlags};

/// Generator text; 91 bytes, deliberately not a divisor of any block size.
pub const TEXT: &[u8] =
    b"The cat in the hat jumped over the quick brown fox while the dog ran away with the spoon.\n";

/// Stride used for pseudo-random block sweeps. The number of blocks in a
/// swept file must be relatively prime to this.
pub const PRIME: u64 = 3197;

/// The byte the generator puts at `position`.
pub fn generate_byte(position: u64) -> u8 {
    TEXT[(position % TEXT.len() as u64) as usize]
}

/// Fills `buf` with generator data for the given file position.
pub fn generate_buffer(position: u64, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = generate_byte(position + i as u64);
    }
}

/// Asserts `buf` holds generator data for the given file position.
pub fn verify_buffer(position: u64, buf: &[u8]) {
    for (i, byte) in buf.iter().enumerate() {
        assert_eq!(
            *byte,
            generate_byte(position + i as u64),
            "mismatch at file position {}",
            position + i as u64
        );
    }
}

/// Creates a file of `file_size` generator bytes, written sequentially in
/// `buffer_size` chunks.
pub fn generate_file(make: &dyn Fn() -> IoStack, path: &Path, file_size: u64, buffer_size: usize) {
    let mut stack = make();
    stack
        .open(
            path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();

    let mut buf = vec![0u8; buffer_size];
    let mut position = 0u64;
    while position < file_size {
        let expected = buffer_size.min((file_size - position) as usize);
        generate_buffer(position, &mut buf[..expected]);
        let actual = stack.write_at(&buf[..expected], position).unwrap();
        assert_eq!(actual, expected);
        position += expected as u64;
    }
    stack.close().unwrap();
}

/// Reads the whole file sequentially and checks it against the generator,
/// including the trailing EOF.
pub fn verify_file(make: &dyn Fn() -> IoStack, path: &Path, file_size: u64, buffer_size: usize) {
    let mut stack = make();
    stack.open(path, &OpenFlags::read_only()).unwrap();

    let mut buf = vec![0u8; buffer_size];
    let mut position = 0u64;
    while position < file_size {
        let expected = buffer_size.min((file_size - position) as usize);
        let actual = stack.read_at(&mut buf, position).unwrap();
        assert_eq!(actual, expected, "short read at position {}", position);
        verify_buffer(position, &buf[..actual]);
        position += actual as u64;
    }

    // One more read hits end-of-file.
    assert_eq!(stack.read_at(&mut buf, position).unwrap(), 0);
    assert!(stack.eof());
    stack.close().unwrap();
}

/// Creates a file of `file_size` bytes filled with 'X', sequentially.
/// Used as the canvas for the pseudo-random overwrite sweep.
pub fn allocate_file(make: &dyn Fn() -> IoStack, path: &Path, file_size: u64, buffer_size: usize) {
    let mut stack = make();
    stack
        .open(
            path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();

    let buf = vec![b'X'; buffer_size];
    let mut position = 0u64;
    while position < file_size {
        let expected = buffer_size.min((file_size - position) as usize);
        assert_eq!(stack.write_at(&buf[..expected], position).unwrap(), expected);
        position += expected as u64;
    }
    stack.close().unwrap();
}

/// Overwrites every block of an existing file in pseudo-random order:
/// iteration `k` writes the block at `(k * PRIME) mod nr_blocks`. The
/// block count must be relatively prime to [`PRIME`] so every block is
/// visited exactly once.
pub fn generate_random_file(make: &dyn Fn() -> IoStack, path: &Path, file_size: u64, block_size: u64) {
    let nr_blocks = file_size.div_ceil(block_size);
    assert!(
        nr_blocks == 0 || nr_blocks % PRIME != 0,
        "block count must be relatively prime to the stride"
    );

    let mut stack = make();
    stack.open(path, &OpenFlags::read_write()).unwrap();

    let mut buf = vec![0u8; block_size as usize];
    for k in 0..nr_blocks {
        let position = (k * PRIME) % nr_blocks * block_size;
        let expected = block_size.min(file_size - position) as usize;
        generate_buffer(position, &mut buf[..expected]);
        assert_eq!(stack.write_at(&buf[..expected], position).unwrap(), expected);
    }
    stack.close().unwrap();
}
