// src/crypto/encryption.rs
//! Authenticated encryption for guarded frames.
//!
//! Every sealed payload is laid out as `nonce || ciphertext || tag` with a
//! fresh random 12-byte nonce and a 16-byte GCM tag, so no nonce state has
//! to be synchronised between the two ends. No associated data is used.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::constants::{NONCE_SIZE, SEAL_OVERHEAD, TAG_SIZE};

/// Error type for encryption operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("Sealed payload too short: {0} bytes (need at least 28)")]
    TooShort(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("No session key installed")]
    NoSessionKey,
}

/// Symmetric session key, AES-128-GCM or AES-256-GCM depending on how it
/// was derived.
#[derive(Clone)]
pub enum SessionKey {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl SessionKey {
    /// Build a key from raw bytes; 16 bytes select AES-128, 32 bytes AES-256
    pub fn from_bytes(key: &[u8]) -> Result<Self, EncryptionError> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| Self::Aes128(Box::new(c)))
                .map_err(|_| EncryptionError::InvalidKeyLength(key.len())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| Self::Aes256(Box::new(c)))
                .map_err(|_| EncryptionError::InvalidKeyLength(key.len())),
            other => Err(EncryptionError::InvalidKeyLength(other)),
        }
    }

    /// Key size in bits
    pub fn bits(&self) -> usize {
        match self {
            Self::Aes128(_) => 128,
            Self::Aes256(_) => 256,
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.seal_with_nonce(plaintext, &generate_nonce())
    }

    /// Encrypt `plaintext` under the given nonce
    pub fn seal_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, EncryptionError> {
        let nonce_ref = Nonce::from_slice(nonce);
        let sealed = match self {
            Self::Aes128(cipher) => cipher.encrypt(nonce_ref, plaintext),
            Self::Aes256(cipher) => cipher.encrypt(nonce_ref, plaintext),
        }
        .map_err(|e| EncryptionError::EncryptionFailed(format!("AES-GCM encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&sealed);
        trace!(
            "Sealed {} plaintext bytes into {} bytes (AES-{})",
            plaintext.len(),
            out.len(),
            self.bits()
        );
        Ok(out)
    }

    /// Verify and decrypt a `nonce || ciphertext || tag` payload
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::TooShort(payload.len()));
        }
        let (nonce, sealed) = payload.split_at(NONCE_SIZE);
        let nonce_ref = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(cipher) => cipher.decrypt(nonce_ref, sealed),
            Self::Aes256(cipher) => cipher.decrypt(nonce_ref, sealed),
        }
        .map_err(|_| {
            debug!("AES-GCM tag check failed on {} byte payload", payload.len());
            EncryptionError::AuthenticationFailed
        })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(AES-{}-GCM)", self.bits())
    }
}

/// Generate a random 12-byte nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
