// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cipher Algorithm Value Object
//!
//! The AEAD ciphers the encryption stage understands, together with the
//! parameters the on-disk format depends on: key size, IV size, tag size,
//! and the padding model.
//!
//! The wire name of the cipher is stored in the encrypted file's header and
//! is authoritative when an existing file is opened: the header name is
//! parsed with [`CipherAlgorithm::from_wire_name`] and an unrecognized name
//! fails the open. Both supported ciphers are stream-style AEADs with a
//! 256-bit key, 96-bit nonce, and 128-bit tag, so ciphertext records are
//! exactly one tag longer than their plaintext.

use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// Supported AEAD ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    /// The exact ASCII name stored in file headers.
    pub fn wire_name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
            CipherAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Parses a header name; the match is exact.
    pub fn from_wire_name(name: &str) -> Result<Self, StackError> {
        match name {
            "aes-256-gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "chacha20-poly1305" => Ok(CipherAlgorithm::ChaCha20Poly1305),
            other => Err(StackError::invalid_header(format!(
                "cipher name '{}' is not recognized",
                other
            ))),
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        32
    }

    /// Initialization vector (nonce) size in bytes.
    pub fn iv_size(&self) -> usize {
        12
    }

    /// Authentication tag size in bytes.
    pub fn tag_size(&self) -> usize {
        16
    }

    /// The cipher block granularity. Both supported ciphers behave as
    /// stream ciphers, so the granularity is a single byte and no padding
    /// is ever added.
    pub fn cipher_block_size(&self) -> usize {
        1
    }

    pub fn has_padding(&self) -> bool {
        self.cipher_block_size() != 1
    }

    /// Padding added when encrypting a record of `record_size` bytes.
    pub fn padding_size(&self, record_size: usize) -> usize {
        if self.has_padding() {
            self.cipher_block_size() - (record_size % self.cipher_block_size())
        } else {
            0
        }
    }

    /// Ciphertext record size for a plaintext record of `record_size`
    /// bytes: plaintext plus padding plus the tag.
    pub fn ciphertext_size(&self, record_size: usize) -> usize {
        record_size + self.padding_size(record_size) + self.tag_size()
    }
}

impl std::fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

impl std::str::FromStr for CipherAlgorithm {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_name(s)
    }
}
