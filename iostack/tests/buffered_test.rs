// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Buffered files over a Posix terminal stage: byte-level sequential and
//! pseudo-random access, append across close, and hole refusal.

mod common;

use iostack::{IoStack, OpenFlags, StackBuilder, StackError};
use proptest::prelude::*;
use tempfile::TempDir;

const FILE_SIZE: u64 = 1024 * 1024;

fn make() -> IoStack {
    StackBuilder::posix().buffered(1024).build()
}

/// A zero-length file reads as an immediate EOF.
#[test]
fn test_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.dat");

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();
    assert_eq!(stack.write_at(&[], 0).unwrap(), 0);
    stack.close().unwrap();

    let mut stack = make();
    stack.open(&path, &OpenFlags::read_only()).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(stack.read_at(&mut buf, 0).unwrap(), 0);
    assert!(stack.eof());
    stack.close().unwrap();
}

/// Sequential write then sequential verify, with chunk sizes that do not
/// divide the buffer size evenly.
#[test]
fn test_sequential_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequential.dat");

    for chunk in [64usize, 1024, 3000] {
        common::generate_file(&make, &path, FILE_SIZE, chunk);
        common::verify_file(&make, &path, FILE_SIZE, chunk);
    }
}

/// Every block overwritten in pseudo-random order reads back sequentially.
#[test]
fn test_random_write_sweep() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.dat");
    let block = 1024u64;

    common::allocate_file(&make, &path, FILE_SIZE, block as usize);
    common::generate_random_file(&make, &path, FILE_SIZE, block);
    common::verify_file(&make, &path, FILE_SIZE, block as usize);
}

/// Append across a close: size is remembered and the new data lands at the
/// end.
#[test]
fn test_append_across_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.dat");

    let mut buf = vec![0u8; 1024];
    common::generate_buffer(0, &mut buf);

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();
    stack.write_at(&buf, 0).unwrap();
    stack.close().unwrap();

    let mut stack = make();
    stack.open(&path, &OpenFlags::read_write()).unwrap();
    assert_eq!(stack.size().unwrap(), 1024);
    common::generate_buffer(1024, &mut buf);
    stack.write_at(&buf, 1024).unwrap();
    stack.close().unwrap();

    common::verify_file(&make, &path, 2048, 2048);
}

/// Writes beyond the end of the data are refused as holes and change
/// nothing.
#[test]
fn test_hole_refusal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("holes.dat");

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();
    stack.write_at(b"solid", 0).unwrap();

    let err = stack.write_at(b"floating", 4096).unwrap_err();
    assert!(matches!(err, StackError::HoleDetected(_)));
    assert_eq!(stack.size().unwrap(), 5);
    stack.close().unwrap();

    let mut stack = make();
    stack.open(&path, &OpenFlags::read_only()).unwrap();
    assert_eq!(stack.size().unwrap(), 5);
    stack.close().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any hole-free sequence of writes reads back exactly like a plain
    /// byte array.
    #[test]
    fn prop_buffered_matches_model(
        ops in proptest::collection::vec((any::<u8>(), 0u16..2048, 1u16..96), 1..40),
    ) {
        let mut stack = StackBuilder::memory().buffered(64).build();
        stack
            .open(
                "model",
                &OpenFlags::read_write().with_create(true).with_truncate(true),
            )
            .unwrap();

        let mut model: Vec<u8> = Vec::new();
        for (byte, offset, len) in ops {
            // Clamp the offset into the file so the write never makes a
            // hole.
            let offset = (offset as usize).min(model.len());
            let len = len as usize;
            let data = vec![byte; len];
            let end = offset + len;
            if model.len() < end {
                model.resize(end, 0);
            }
            model[offset..end].copy_from_slice(&data);
            prop_assert_eq!(stack.write_at(&data, offset as u64).unwrap(), len);
        }

        let mut readback = vec![0u8; model.len()];
        prop_assert_eq!(stack.read_at(&mut readback, 0).unwrap(), model.len());
        prop_assert_eq!(readback, model.clone());
        prop_assert_eq!(stack.size().unwrap(), model.len() as u64);
        stack.close().unwrap();
    }
}

/// Size never decreases across reads and grows with extending writes.
#[test]
fn test_size_monotonicity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("size.dat");

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::read_write().with_create(true).with_truncate(true),
        )
        .unwrap();

    let mut last = 0u64;
    let mut buf = vec![0u8; 700];
    for step in 0..20u64 {
        common::generate_buffer(step * 700, &mut buf);
        stack.write_at(&buf, step * 700).unwrap();
        let size = stack.size().unwrap();
        assert!(size >= last);
        assert_eq!(size, (step + 1) * 700);
        last = size;

        let mut readback = [0u8; 64];
        stack.read_at(&mut readback, step * 350).unwrap();
        assert!(stack.size().unwrap() >= last);
    }
    stack.close().unwrap();
}
