// /////////////////////////////////////////////////////////////////////////////
// Layered I/O Stack
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Encryption Key Value Object
//!
//! Secure storage for raw key material. The bytes are wiped from memory
//! when the key is dropped, and the `Debug` rendering never exposes them.
//! Key derivation from passwords is out of scope; callers hand the stack
//! ready-to-use key material.

use zeroize::Zeroize;

use crate::error::StackError;

/// Raw cryptographic key material, zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    material: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(material: Vec<u8>) -> Self {
        Self { material }
    }

    /// Parses hex-encoded key material.
    pub fn from_hex(encoded: &str) -> Result<Self, StackError> {
        let material = hex::decode(encoded)
            .map_err(|e| StackError::invalid_config(format!("key is not valid hex: {}", e)))?;
        Ok(Self { material })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.material
    }

    pub fn len(&self) -> usize {
        self.material.len()
    }

    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.material.len())
    }
}
