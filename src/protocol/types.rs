// src/protocol/types.rs
//! Handshake records, protocol states and the protocol error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::config::constants::{
    CODE_AGREEMENT_REJECTED, CODE_DECRYPT_FAILED, CODE_ENCODE_FAILED, CODE_HANDSHAKE_REJECTED,
};
use crate::crypto::{EncryptionError, KeyError};

/// Error type for protocol handling
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Handshake did not complete within the send timeout")]
    HandshakeTimeout,

    #[error("Protocol is closed")]
    Closed,

    #[error("Protocol has not been initialized")]
    NotInitialized,

    #[error("Handshake rejected (code {code:#04x}): {reason}")]
    HandshakeRejected { code: u8, reason: String },

    #[error("Invalid handshake record: {0}")]
    InvalidRecord(String),

    #[error("Record encoding failed: {0}")]
    Encode(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Single-byte code written to the peer when this error ends a frame
    pub fn wire_code(&self) -> u8 {
        match self {
            Self::HandshakeRejected { code, .. } => *code,
            Self::Encode(_) => CODE_ENCODE_FAILED,
            Self::Encryption(_) => CODE_DECRYPT_FAILED,
            Self::Key(_) => CODE_AGREEMENT_REJECTED,
            _ => CODE_HANDSHAKE_REJECTED,
        }
    }

    pub(crate) fn rejected(code: u8, reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            code,
            reason: reason.into(),
        }
    }
}

/// Handshake payload carried in one frame.
///
/// `token` holds the passphrase or the fixed literal; `key` holds the
/// base64 public key for the key-agreement scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRecord {
    pub token: Option<String>,
    pub key: Option<String>,
}

impl HandshakeRecord {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            key: None,
        }
    }

    pub fn with_token_and_key(token: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            key: Some(key.into()),
        }
    }
}

/// Lifecycle of a protocol instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    AwaitingPeerHandshake,
    Ready,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingPeerHandshake => "awaiting-peer-handshake",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}
