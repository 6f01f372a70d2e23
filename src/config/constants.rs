// src/config/constants.rs
//! Protocol constants and fixed settings.
//!
//! These values are part of the wire contract with the peer application
//! and must not change independently on one side.

use std::time::Duration;

/// Framing
pub const MAX_FRAME_PAYLOAD: usize = u8::MAX as usize;
pub const FRAME_HEADER_SIZE: usize = 1;

/// AES-GCM wire layout: nonce || ciphertext || tag
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
pub const MAX_SEALED_PLAINTEXT: usize = MAX_FRAME_PAYLOAD - SEAL_OVERHEAD; // 227

/// Key derivation
pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const PASSPHRASE_SALT: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
pub const PASSPHRASE_KEY_SIZE: usize = 32; // AES-256
pub const AGREED_KEY_SIZE: usize = 16; // AES-128, truncated SHA-256 of the ECDH secret
pub const UNCOMPRESSED_POINT_SIZE: usize = 65;

/// Handshake
pub const HANDSHAKE_LITERAL: &str = "HANDSHAKE";
pub const MAX_TOKEN_LEN: usize = 64;
pub const MAX_KEY_FIELD_LEN: usize = 128;
pub const SEND_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-byte error codes written on the wire
pub const CODE_HANDSHAKE_REJECTED: u8 = 0x01;
pub const CODE_DECRYPT_FAILED: u8 = 0x02;
pub const CODE_ENCODE_FAILED: u8 = 0x05;
pub const CODE_AGREEMENT_REJECTED: u8 = 0x11;

/// Connection
pub const TRIGGER_SUFFIX: &str = "guard";
pub const MAX_LINE_ACCUMULATION: usize = 8 * 1024;
pub const READ_BUFFER_SIZE: usize = 512;
pub const OUTBOUND_QUEUE_DEPTH: usize = 16;
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const IDLE_RETRY_DELAY: Duration = Duration::from_millis(10);
pub const SENDER_POLL_INTERVAL: Duration = Duration::from_millis(100);
