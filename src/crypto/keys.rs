// src/crypto/keys.rs
//! Key material for guarded links.
//!
//! This module handles the ephemeral P-256 key pair used by the
//! key-agreement variant and the two ways a session key is produced:
//! ECDH followed by SHA-256, and PBKDF2-HMAC-SHA256 over the passphrase.

use hmac::Hmac;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::constants::{AGREED_KEY_SIZE, PASSPHRASE_KEY_SIZE, PBKDF2_ITERATIONS};

/// Error type for key-related operations
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("No key pair generated")]
    NoKeyPair,

    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid peer public key: {0}")]
    InvalidPoint(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Session key rejected: {0}")]
    Install(#[from] crate::crypto::encryption::EncryptionError),
}

/// Per-connection P-256 key pair
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new key pair from the operating system RNG
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        debug!("Generated ephemeral P-256 key pair");
        Self { secret, public }
    }

    /// SEC1 uncompressed encoding of the public point (65 bytes)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Standard base64 of the uncompressed public point
    pub fn public_key_base64(&self) -> String {
        base64::encode(self.public_key_bytes())
    }

    /// Run ECDH against the peer's base64 public key and derive the
    /// 128-bit session key from it.
    pub fn agree(&self, peer_public_b64: &str) -> Result<[u8; AGREED_KEY_SIZE], KeyError> {
        let peer = decode_public_key(peer_public_b64)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(derive_agreed_key(shared.raw_secret_bytes().as_slice()))
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Decode a base64 SEC1 public key and check that it lies on P-256
pub fn decode_public_key(public_b64: &str) -> Result<PublicKey, KeyError> {
    let raw = base64::decode(public_b64.trim())?;
    PublicKey::from_sec1_bytes(&raw).map_err(|e| {
        error!("Peer public key is not a valid P-256 point ({} bytes)", raw.len());
        KeyError::InvalidPoint(e.to_string())
    })
}

/// Hash an ECDH shared secret and keep the first 16 bytes
pub fn derive_agreed_key(shared_secret: &[u8]) -> [u8; AGREED_KEY_SIZE] {
    let digest = Sha256::digest(shared_secret);
    let mut key = [0u8; AGREED_KEY_SIZE];
    key.copy_from_slice(&digest[..AGREED_KEY_SIZE]);
    key
}

/// PBKDF2-HMAC-SHA256 over the passphrase, 256-bit output
pub fn derive_passphrase_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<[u8; PASSPHRASE_KEY_SIZE], KeyError> {
    let mut key = [0u8; PASSPHRASE_KEY_SIZE];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
        .map_err(|e| KeyError::Derivation(format!("PBKDF2 failed: {}", e)))?;
    Ok(key)
}
