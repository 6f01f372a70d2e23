// src/types.rs
//! Crate-wide error and result types.

use crate::config::ConfigError;
use crate::crypto::{EncryptionError, KeyError};
use crate::protocol::ProtocolError;
use crate::server::{ConnectionError, ServerError};

/// Error types for guarded link operations
#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Result type for guarded link operations
pub type Result<T> = std::result::Result<T, LinkError>;
