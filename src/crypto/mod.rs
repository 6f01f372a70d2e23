// src/crypto/mod.rs
//! Cryptography module for guarded links.
//!
//! This module provides the session-key cipher, P-256 key agreement,
//! passphrase key derivation and the per-connection `CryptoEngine`.

pub mod encryption;
pub mod keys;
pub mod session;

// Re-export commonly used items
pub use encryption::{EncryptionError, SessionKey};
pub use keys::{EphemeralKeyPair, KeyError};
pub use session::CryptoEngine;
