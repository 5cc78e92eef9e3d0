// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Encrypted files: end-to-end scenarios through a buffered stack over the
//! AEAD stage, on-disk format checks, and tamper detection.

mod common;

use std::path::Path;

use iostack::{
    AeadStage, CipherAlgorithm, EncryptionKey, IoStack, OpenFlags, PosixFileStage, Stage,
    StackBuilder, StackError,
};
use tempfile::TempDir;

const KEY: &[u8; 32] = b"0123456789ABCDEF0123456789ABCDEF";
const RECORD: usize = 1024;
/// Ciphertext record: plaintext plus the 16-byte tag.
const CRYPT_RECORD: u64 = RECORD as u64 + 16;

fn key() -> EncryptionKey {
    EncryptionKey::new(KEY.to_vec())
}

fn make() -> IoStack {
    StackBuilder::posix()
        .aead(CipherAlgorithm::Aes256Gcm, key(), RECORD)
        .buffered(4 * 1024)
        .build()
}

/// Header size as stored on disk: the 4-byte length prefix plus the
/// length it declares.
fn header_size(path: &Path) -> u64 {
    let raw = std::fs::read(path).unwrap();
    4 + u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64
}

/// Empty write then verify: the file holds a header plus a zero-length
/// terminal record, and reads as EOF.
#[test]
fn test_empty_write_verify() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.enc");

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();
    assert_eq!(stack.write_at(&[], 0).unwrap(), 0);
    stack.close().unwrap();

    // Header plus the empty terminal record (tag only).
    let disk = std::fs::metadata(&path).unwrap().len();
    assert_eq!(disk, header_size(&path) + 16);

    let mut stack = make();
    stack.open(&path, &OpenFlags::read_only()).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(stack.read_at(&mut buf, 0).unwrap(), 0);
    assert!(stack.eof());
    stack.close().unwrap();
}

/// Aligned sequential writes of a megabyte of text round-trip.
#[test]
fn test_aligned_sequential() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequential.enc");

    common::generate_file(&make, &path, 1024 * 1024, RECORD);
    common::verify_file(&make, &path, 1024 * 1024, RECORD);

    // Every record is full, so the file ends with header + records + the
    // empty terminal record.
    let records = 1024 * 1024 / RECORD as u64;
    let disk = std::fs::metadata(&path).unwrap().len();
    assert_eq!(disk, header_size(&path) + records * CRYPT_RECORD + 16);
}

/// A file written by overwriting every block in pseudo-random order reads
/// back as the generator sequence.
#[test]
fn test_random_write_sweep() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.enc");
    let file_size = 1024 * RECORD as u64;

    common::allocate_file(&make, &path, file_size, RECORD);
    common::generate_random_file(&make, &path, file_size, RECORD as u64);
    common::verify_file(&make, &path, file_size, RECORD);
}

/// Append across close: the size survives the reopen and the appended
/// record lands at the end.
#[test]
fn test_append_across_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.enc");
    let mut buf = vec![0u8; RECORD];

    let mut stack = make();
    stack
        .open(
            &path,
            &OpenFlags::write_only().with_create(true).with_truncate(true),
        )
        .unwrap();
    common::generate_buffer(0, &mut buf);
    stack.write_at(&buf, 0).unwrap();
    stack.close().unwrap();

    let mut stack = make();
    stack.open(&path, &OpenFlags::read_write()).unwrap();
    assert_eq!(stack.size().unwrap(), RECORD as u64);
    common::generate_buffer(RECORD as u64, &mut buf);
    stack.write_at(&buf, RECORD as u64).unwrap();
    stack.close().unwrap();

    common::verify_file(&make, &path, 2 * RECORD as u64, 2 * RECORD);
}

/// A partial final record of every length near the record boundary.
#[test]
fn test_partial_final_record_sizes() {
    let dir = TempDir::new().unwrap();
    for size in [1u64, RECORD as u64 - 1, RECORD as u64, RECORD as u64 + 1] {
        let path = dir.path().join(format!("partial_{}.enc", size));
        common::generate_file(&make, &path, size, RECORD);
        common::verify_file(&make, &path, size, RECORD);

        let mut stack = make();
        stack.open(&path, &OpenFlags::read_only()).unwrap();
        assert_eq!(stack.size().unwrap(), size);
        stack.close().unwrap();
    }
}

/// Flipping one ciphertext bit makes exactly that record unreadable;
/// other records still decrypt.
#[test]
fn test_tamper_detection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tampered.enc");

    // Two full records of plaintext.
    common::generate_file(&make, &path, 2 * RECORD as u64, RECORD);

    // Flip a byte inside the second ciphertext record.
    let header = header_size(&path);
    let mut raw = std::fs::read(&path).unwrap();
    let victim = (header + CRYPT_RECORD + 10) as usize;
    raw[victim] ^= 0x01;
    std::fs::write(&path, &raw).unwrap();

    // Read the records through a bare AEAD stage.
    let mut stage = AeadStage::new(
        CipherAlgorithm::Aes256Gcm,
        key(),
        RECORD,
        Box::new(PosixFileStage::new()),
    );
    stage.open(&path, &OpenFlags::read_only()).unwrap();

    let mut buf = vec![0u8; RECORD];
    assert_eq!(stage.read(&mut buf, 0).unwrap(), RECORD);
    common::verify_buffer(0, &buf);

    let err = stage.read(&mut buf, RECORD as u64).unwrap_err();
    assert!(matches!(err, StackError::IntegrityError(_)));

    // The failure is not sticky; the intact record still reads.
    assert_eq!(stage.read(&mut buf, 0).unwrap(), RECORD);
    stage.close().unwrap();
}

/// The header names the cipher; a reader configured differently follows
/// the header, and the wrong key fails the header check at open.
#[test]
fn test_header_is_authoritative() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chacha.enc");

    let make_chacha = || {
        StackBuilder::posix()
            .aead(CipherAlgorithm::ChaCha20Poly1305, key(), RECORD)
            .buffered(4 * 1024)
            .build()
    };
    common::generate_file(&make_chacha, &path, 4096, RECORD);

    // A reader configured for AES still reads it: the header wins.
    common::verify_file(&make, &path, 4096, RECORD);

    // The wrong key is caught by the header tag before any data I/O.
    let mut stage = AeadStage::new(
        CipherAlgorithm::ChaCha20Poly1305,
        EncryptionKey::new(vec![0x42; 32]),
        RECORD,
        Box::new(PosixFileStage::new()),
    );
    let err = stage.open(&path, &OpenFlags::read_only()).unwrap_err();
    assert!(matches!(err, StackError::InvalidHeader(_)));
}

/// Unaligned appends are refused at the record layer; the buffered stage
/// above is the supported route.
#[test]
fn test_unaligned_append_needs_buffering() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unaligned.enc");

    let mut stage = AeadStage::new(
        CipherAlgorithm::Aes256Gcm,
        key(),
        RECORD,
        Box::new(PosixFileStage::new()),
    );
    stage
        .open(
            &path,
            &OpenFlags::read_write().with_create(true).with_truncate(true),
        )
        .unwrap();

    let mut half = vec![0u8; 100];
    common::generate_buffer(0, &mut half);
    stage.write(&half, 0).unwrap();

    let err = stage.write(&half, 100).unwrap_err();
    assert!(matches!(err, StackError::UnalignedAccess(_)));
    stage.close().unwrap();
}
