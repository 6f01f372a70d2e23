// src/utils/mod.rs
//! Utility functions and helpers.
//!
//! This module contains general-purpose utilities used across
//! the application.

pub mod logging;

/// Convert bytes to a hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Hex of at most `limit` leading bytes, with an ellipsis when truncated
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        hex::encode(bytes)
    } else {
        format!("{}..", hex::encode(&bytes[..limit]))
    }
}

/// Sanitize a log message to prevent log injection
pub fn sanitize_log(input: &str) -> String {
    input
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        assert_eq!(bytes_to_hex(&[0x04, 0x50, 0x49]), "045049");
        assert_eq!(bytes_to_hex(&[]), "");
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[1, 2, 3], 8), "010203");
        assert_eq!(hex_preview(&[1, 2, 3, 4], 2), "0102..");
    }

    #[test]
    fn test_sanitize_log() {
        assert_eq!(sanitize_log("a\nb\rc\td"), "a\\nb\\rc\\td");
        assert_eq!(sanitize_log("enable_guard"), "enable_guard");
    }
}
