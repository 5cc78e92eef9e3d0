// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # AEAD Stage
//!
//! Encrypts fixed-size plaintext records into slightly larger authenticated
//! ciphertext records and reads or writes them at random record positions.
//!
//! ## On-disk layout
//!
//! ```text
//! [ u32 header length ][ header bytes ]
//! [ ciphertext record 0 | tag ]
//! [ ciphertext record 1 | tag ]
//! ...
//! [ final partial ciphertext record | tag ]   <- always present
//! ```
//!
//! The header stores the plaintext record size, the cipher name, the
//! random initialization vector, the ciphertext of an empty record, and an
//! authentication tag computed over the header prefix, so a reader
//! recovers every parameter from the file alone; only the key is external.
//! Header fields are packed big-endian.
//!
//! Each record is sealed with a nonce derived as in RFC 8446: the record
//! sequence number (`offset / record_size`, or `u64::MAX` for the header)
//! is extended big-endian to the IV width and XORed with the IV. With the
//! supported stream-style AEADs a ciphertext record is exactly one tag
//! longer than its plaintext, so record positions translate linearly.
//!
//! ## End-of-file
//!
//! The file always ends with a partial (possibly empty) record; that
//! partial record is what lets a reader distinguish the end of data from a
//! full record. Because records may be written in any order, `close` runs a
//! cheapest-first series of tests to decide whether the terminal empty
//! record still needs to be written, in the worst case asking [`Stage::size`]
//! to decrypt the final record for an exact answer.
//!
//! Appends that do not land on a record boundary and partial records
//! before the end of data are refused: both would corrupt the framing.
//! Callers that need byte-level appends compose a Buffered stage above
//! this one.

use std::path::Path;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce, Tag as ChaChaTag};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, trace};

use iostack_domain::value_objects::block_size::BlockSize;
use iostack_domain::wire::{self, Unpacker};
use iostack_domain::{CipherAlgorithm, EncryptionKey, OpenFlags, Stage, StageExt, StackError};

/// Sequence number reserved for the header, distinct from any record.
const HEADER_SEQUENCE: u64 = u64::MAX;

/// Upper bound on the encoded header.
const MAX_HEADER_SIZE: usize = 1024;

/// A keyed cipher instance, reset per record through the detached-tag API.
enum CipherCtx {
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl CipherCtx {
    fn new(algorithm: CipherAlgorithm, key: &EncryptionKey) -> Result<Self, StackError> {
        if key.len() != algorithm.key_size() {
            return Err(StackError::invalid_config(format!(
                "cipher {} requires a {}-byte key, got {} bytes",
                algorithm,
                algorithm.key_size(),
                key.len()
            )));
        }
        match algorithm {
            CipherAlgorithm::Aes256Gcm => {
                let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
                Ok(Self::Aes256Gcm(Box::new(Aes256Gcm::new(key))))
            }
            CipherAlgorithm::ChaCha20Poly1305 => {
                let key = ChaChaKey::from_slice(key.as_bytes());
                Ok(Self::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new(key))))
            }
        }
    }

    /// Encrypts `buffer` in place, returning the detached tag.
    fn seal(&self, nonce: &[u8], aad: &[u8], buffer: &mut [u8]) -> Result<Vec<u8>, StackError> {
        match self {
            Self::Aes256Gcm(cipher) => cipher
                .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buffer)
                .map(|tag| tag.to_vec())
                .map_err(|e| StackError::encryption(format!("aes-256-gcm encryption failed: {:?}", e))),
            Self::ChaCha20Poly1305(cipher) => cipher
                .encrypt_in_place_detached(ChaChaNonce::from_slice(nonce), aad, buffer)
                .map(|tag| tag.to_vec())
                .map_err(|e| {
                    StackError::encryption(format!("chacha20-poly1305 encryption failed: {:?}", e))
                }),
        }
    }

    /// Decrypts `buffer` in place, verifying the detached tag.
    fn open_record(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), StackError> {
        match self {
            Self::Aes256Gcm(cipher) => cipher
                .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, buffer, Tag::from_slice(tag))
                .map_err(|_| StackError::integrity("authentication tag mismatch")),
            Self::ChaCha20Poly1305(cipher) => cipher
                .decrypt_in_place_detached(
                    ChaChaNonce::from_slice(nonce),
                    aad,
                    buffer,
                    ChaChaTag::from_slice(tag),
                )
                .map_err(|_| StackError::integrity("authentication tag mismatch")),
        }
    }
}

/// Derives a per-record nonce as in RFC 8446 §5.3: the sequence number is
/// extended big-endian to the IV width and XORed byte-wise with the IV.
fn derive_nonce(iv: &[u8], sequence: u64) -> Vec<u8> {
    let mut nonce = vec![0u8; iv.len()];
    let mut seq = sequence;
    for i in (0..iv.len()).rev() {
        nonce[i] = (seq as u8) ^ iv[i];
        seq >>= 8;
    }
    nonce
}

/// Authenticated encryption of fixed-size records.
pub struct AeadStage {
    // Configuration, used when creating a new file.
    algorithm: CipherAlgorithm,
    key: EncryptionKey,
    suggested_size: usize,
    rng: SystemRandom,

    next: Box<dyn Stage>,

    // Cipher state, from the header or the configuration.
    cipher: Option<CipherCtx>,
    iv: Vec<u8>,
    plain_size: usize,
    crypt_size: usize,
    tag_size: usize,
    header_size: u64,

    crypt_buf: Vec<u8>,
    probe_buf: Vec<u8>,

    writable: bool,
    open: bool,
    eof: bool,

    // Plaintext positions used to decide whether the terminal empty
    // record still needs to be written.
    size_confirmed: bool,
    file_size: u64,
    max_write_position: u64,
}

impl AeadStage {
    /// Creates an AEAD stage over `next`. `record_size` is the plaintext
    /// record size used when creating a new file; for an existing file the
    /// header value wins.
    pub fn new(
        algorithm: CipherAlgorithm,
        key: EncryptionKey,
        record_size: usize,
        next: Box<dyn Stage>,
    ) -> Self {
        Self {
            algorithm,
            key,
            suggested_size: record_size,
            rng: SystemRandom::new(),
            next,
            cipher: None,
            iv: Vec::new(),
            plain_size: record_size,
            crypt_size: 0,
            tag_size: 0,
            header_size: 0,
            crypt_buf: Vec::new(),
            probe_buf: Vec::new(),
            writable: false,
            open: false,
            eof: false,
            size_confirmed: false,
            file_size: 0,
            max_write_position: 0,
        }
    }

    fn require_open(&self) -> Result<(), StackError> {
        if self.open {
            Ok(())
        } else {
            Err(StackError::not_open("aead stage"))
        }
    }

    /// Translates a plaintext record offset to the ciphertext file offset.
    fn crypt_offset(&self, plain_offset: u64) -> u64 {
        plain_offset / self.plain_size as u64 * self.crypt_size as u64 + self.header_size
    }

    /// Reads and verifies the header of an existing file. `Ok(false)`
    /// means the file holds no header yet (empty file).
    fn read_header(&mut self) -> Result<bool, StackError> {
        let mut header = vec![0u8; MAX_HEADER_SIZE];
        let header_len = match self.next.read_sized(&mut header, 0)? {
            None => return Ok(false),
            Some(n) => n,
        };
        self.header_size = header_len as u64 + 4;
        let header = &header[..header_len];

        let mut cursor = Unpacker::new(header);

        let plain_size = cursor.u32()? as usize;
        BlockSize::new(plain_size).map_err(|_| {
            StackError::invalid_header(format!("plaintext record size {} is out of range", plain_size))
        })?;

        let name_bytes = cursor.bytes8()?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| StackError::invalid_header("cipher name is not valid ASCII"))?;
        let algorithm = CipherAlgorithm::from_wire_name(name)?;

        let iv = cursor.bytes8()?.to_vec();
        if iv.len() != algorithm.iv_size() {
            return Err(StackError::invalid_header(format!(
                "initialization vector of {} bytes, cipher {} expects {}",
                iv.len(),
                algorithm,
                algorithm.iv_size()
            )));
        }

        // The tagged prefix ends where the empty-record field begins.
        let prefix_len = cursor.position();

        let mut empty_record = cursor.bytes8()?.to_vec();
        let tag = cursor.bytes8()?.to_vec();
        if tag.len() != algorithm.tag_size() {
            return Err(StackError::invalid_header(format!(
                "authentication tag of {} bytes, cipher {} expects {}",
                tag.len(),
                algorithm,
                algorithm.tag_size()
            )));
        }

        // Authenticate the header by opening the empty record with the
        // prefix as associated data.
        let cipher = CipherCtx::new(algorithm, &self.key)?;
        let nonce = derive_nonce(&iv, HEADER_SEQUENCE);
        cipher
            .open_record(&nonce, &header[..prefix_len], &mut empty_record, &tag)
            .map_err(|_| {
                StackError::invalid_header(
                    "header authentication failed: wrong key or corrupted header",
                )
            })?;

        debug!(
            cipher = %algorithm,
            plain_size,
            iv = %hex::encode(&iv),
            "verified encryption header"
        );

        self.algorithm = algorithm;
        self.plain_size = plain_size;
        self.tag_size = algorithm.tag_size();
        self.crypt_size = algorithm.ciphertext_size(plain_size);
        self.iv = iv;
        self.cipher = Some(cipher);
        Ok(true)
    }

    /// Creates and writes the header for a new file.
    fn write_header(&mut self) -> Result<(), StackError> {
        let algorithm = self.algorithm;
        let cipher = CipherCtx::new(algorithm, &self.key)?;
        BlockSize::new(self.suggested_size)?;
        self.plain_size = self.suggested_size;

        let mut iv = vec![0u8; algorithm.iv_size()];
        self.rng.fill(&mut iv).map_err(|e| {
            StackError::encryption(format!("failed to generate initialization vector: {:?}", e))
        })?;

        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        wire::put_u32(&mut header, self.plain_size as u32);
        wire::put_bytes8(&mut header, algorithm.wire_name().as_bytes())?;
        wire::put_bytes8(&mut header, &iv)?;
        let prefix_len = header.len();

        // Seal an empty record, authenticating the prefix. For the
        // stream-style ciphers the empty ciphertext is empty; only the tag
        // carries information.
        let nonce = derive_nonce(&iv, HEADER_SEQUENCE);
        let mut empty_record = [0u8; 0];
        let tag = cipher.seal(&nonce, &header[..prefix_len], &mut empty_record)?;
        debug_assert_eq!(empty_record.len(), algorithm.padding_size(0));

        wire::put_bytes8(&mut header, &empty_record)?;
        wire::put_bytes8(&mut header, &tag)?;
        if header.len() > MAX_HEADER_SIZE {
            return Err(StackError::invalid_header("encryption header is too large"));
        }

        self.next.write_sized(&header, 0)?;
        self.header_size = header.len() as u64 + 4;
        self.tag_size = algorithm.tag_size();
        self.crypt_size = algorithm.ciphertext_size(self.plain_size);
        self.iv = iv;
        self.cipher = Some(cipher);

        debug!(
            cipher = %algorithm,
            plain_size = self.plain_size,
            header_size = self.header_size,
            "wrote encryption header"
        );
        Ok(())
    }

    /// Reads the header if one exists, otherwise writes a fresh one.
    fn configure(&mut self) -> Result<(), StackError> {
        if self.read_header()? {
            return Ok(());
        }
        if !self.writable {
            return Err(StackError::invalid_header(
                "read-only file has no encryption header",
            ));
        }
        self.write_header()
    }

    /// Decides whether a terminal empty record must be written, running
    /// the cheapest tests first. May consult the successor's size and, in
    /// the worst case, decrypt the final record for an exact file size.
    fn needs_final_record(&mut self) -> Result<bool, StackError> {
        // Read-only file: nothing to finish.
        if !self.writable {
            return Ok(false);
        }
        // We never extended the file.
        if self.file_size > self.max_write_position {
            return Ok(false);
        }
        // The biggest write we know of was already partial.
        let plain = self.plain_size as u64;
        if self.file_size % plain != 0 {
            return Ok(false);
        }
        // The size was exact, so the file really ends on a record boundary.
        if self.size_confirmed {
            return Ok(true);
        }
        // The ciphertext file holds more records than we wrote.
        let next_size = self.next.size()?;
        if self.crypt_offset(self.file_size) < next_size {
            return Ok(false);
        }
        // Pin the size down precisely and retest.
        let exact = self.size()?;
        if exact % plain != 0 {
            return Ok(false);
        }
        if self.crypt_offset(exact) < next_size {
            return Ok(false);
        }
        Ok(true)
    }
}

impl Stage for AeadStage {
    fn open(&mut self, path: &Path, flags: &OpenFlags) -> Result<(), StackError> {
        if flags.append() {
            return Err(StackError::not_supported(
                "appending to an encrypted file requires a buffered stage above it",
            ));
        }
        self.writable = flags.writable();

        // The header and the size probe are reads, even when the caller
        // only writes.
        let down = flags.upgraded_to_read_write();
        self.next.open(path, &down)?;

        if let Err(e) = self.configure() {
            let _ = self.next.close();
            return Err(e);
        }

        if self.crypt_size % self.next.block_size() != 0 {
            let failure = StackError::incompatible_block_size(format!(
                "ciphertext records of {} bytes cannot be addressed in units of {}",
                self.crypt_size,
                self.next.block_size()
            ));
            let _ = self.next.close();
            return Err(failure);
        }

        self.crypt_buf = vec![0u8; self.crypt_size];
        self.probe_buf = vec![0u8; self.plain_size];
        self.max_write_position = 0;
        self.file_size = 0;
        self.size_confirmed = flags.truncate();
        self.eof = false;
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        trace!(offset, size = buf.len(), file_size = self.file_size, "aead read");

        // Positioned exactly at a confirmed end of file.
        if self.size_confirmed && offset == self.file_size {
            self.eof = true;
            return Ok(0);
        }

        let plain = self.plain_size as u64;
        if offset % plain != 0 {
            return Err(StackError::unaligned(format!(
                "read at offset {} is not aligned to {}-byte records",
                offset, plain
            )));
        }

        let crypt_off = self.crypt_offset(offset);
        let actual = self.next.read_all(&mut self.crypt_buf, crypt_off)?;
        if actual == 0 {
            self.eof = true;
            return Ok(0);
        }
        if actual < self.tag_size {
            return Err(StackError::corrupt_record(format!(
                "ciphertext record of {} bytes is shorter than its {}-byte tag",
                actual, self.tag_size
            )));
        }

        // Split off the tag and decrypt in place. A record shorter than
        // the full ciphertext size is the final partial record and pins
        // down the file size.
        let cipher_len = actual - self.tag_size;
        let block_nr = offset / plain;
        let nonce = derive_nonce(&self.iv, block_nr);
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| StackError::not_open("aead cipher"))?;
        let (body, tag) = self.crypt_buf[..actual].split_at_mut(cipher_len);
        cipher.open_record(&nonce, &[], body, tag).map_err(|_| {
            StackError::integrity(format!("authentication tag mismatch for record {}", block_nr))
        })?;

        let plain_len = cipher_len;
        let copied = plain_len.min(buf.len());
        buf[..copied].copy_from_slice(&body[..copied]);

        self.size_confirmed |= plain_len < self.plain_size;
        self.file_size = self.file_size.max(offset + plain_len as u64);
        self.eof = plain_len == 0;
        Ok(copied)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize, StackError> {
        self.require_open()?;
        if !self.writable {
            return Err(StackError::not_supported("write on a read-only encrypted file"));
        }
        trace!(offset, size = buf.len(), file_size = self.file_size, "aead write");

        let plain = self.plain_size as u64;
        if offset % plain != 0 {
            if self.size_confirmed && offset == self.file_size {
                return Err(StackError::unaligned(
                    "appending to an encrypted file requires a buffered stage above it",
                ));
            }
            return Err(StackError::unaligned(format!(
                "write at offset {} is not aligned to {}-byte records",
                offset, plain
            )));
        }
        // A short record anywhere but the end would corrupt the framing.
        if buf.len() < self.plain_size && offset + (buf.len() as u64) < self.file_size {
            return Err(StackError::unaligned(
                "a partial record before the end of file would corrupt the record framing",
            ));
        }

        let plain_len = buf.len().min(self.plain_size);
        let block_nr = offset / plain;
        let nonce = derive_nonce(&self.iv, block_nr);

        self.crypt_buf[..plain_len].copy_from_slice(&buf[..plain_len]);
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| StackError::not_open("aead cipher"))?;
        let tag = cipher.seal(&nonce, &[], &mut self.crypt_buf[..plain_len])?;

        let cipher_len = plain_len + tag.len();
        self.crypt_buf[plain_len..cipher_len].copy_from_slice(&tag);

        let crypt_off = self.crypt_offset(offset);
        let written = self.next.write_all(&self.crypt_buf[..cipher_len], crypt_off)?;
        if written != cipher_len {
            return Err(StackError::Io {
                errno: 0,
                message: format!(
                    "short write of ciphertext record {}: {} of {} bytes",
                    block_nr, written, cipher_len
                ),
            });
        }

        self.max_write_position = self.max_write_position.max(offset + plain_len as u64);
        self.file_size = self.file_size.max(self.max_write_position);
        Ok(plain_len)
    }

    fn close(&mut self) -> Result<(), StackError> {
        let mut first_error: Option<StackError> = None;

        if self.open {
            // Make sure the file ends with a partial (possibly empty)
            // record so readers can recognize the end of data.
            match self.needs_final_record() {
                Ok(true) => match self.size() {
                    Ok(size) => {
                        debug!(size, "writing terminal empty record");
                        if let Err(e) = self.write(&[], size) {
                            first_error.get_or_insert(e);
                        }
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.next.close() {
            first_error.get_or_insert(e);
        }

        self.crypt_buf = Vec::new();
        self.probe_buf = Vec::new();
        self.cipher = None;
        self.open = false;
        self.writable = false;

        first_error.map_or(Ok(()), Err)
    }

    fn sync(&mut self) -> Result<(), StackError> {
        self.require_open()?;
        // Nothing is buffered at this stage.
        self.next.sync()
    }

    fn truncate(&mut self, _offset: u64) -> Result<(), StackError> {
        Err(StackError::not_supported("truncate on an encrypted file"))
    }

    fn size(&mut self) -> Result<u64, StackError> {
        self.require_open()?;
        if self.size_confirmed {
            return Ok(self.file_size);
        }

        // Locate the final ciphertext record. The file normally ends with
        // a partial record; if it happens to end exactly on a record
        // boundary (interrupted writer), the last full record is final.
        let crypt_file_size = self.next.size()?;
        let body = crypt_file_size.saturating_sub(self.header_size);
        let crypt = self.crypt_size as u64;
        let mut last_block = body / crypt;
        if body % crypt == 0 && last_block > 0 {
            last_block -= 1;
        }

        // Only decryption reveals the exact plaintext length of the final
        // record.
        let offset = last_block * self.plain_size as u64;
        let mut probe = std::mem::take(&mut self.probe_buf);
        let result = self.read(&mut probe, offset);
        self.probe_buf = probe;
        let last_len = result?;

        self.file_size = offset + last_len as u64;
        self.size_confirmed = true;
        trace!(file_size = self.file_size, "aead size confirmed");
        Ok(self.file_size)
    }

    fn block_size(&self) -> usize {
        self.plain_size
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(AeadStage::new(
            self.algorithm,
            self.key.clone(),
            self.suggested_size,
            self.next.clone_stage(),
        ))
    }
}
