// src/protocol/validation.rs
//! Handshake record validation.
//!
//! This module checks record fields against their size limits and
//! compares tokens without early exit.

use crate::config::constants::{MAX_KEY_FIELD_LEN, MAX_TOKEN_LEN};
use crate::protocol::types::{HandshakeRecord, ProtocolError};

/// Check field sizes of a handshake record
pub fn validate_record(record: &HandshakeRecord) -> Result<(), ProtocolError> {
    if let Some(token) = &record.token {
        if token.len() > MAX_TOKEN_LEN {
            return Err(ProtocolError::InvalidRecord(format!(
                "Token too long: {} bytes",
                token.len()
            )));
        }
    }

    if let Some(key) = &record.key {
        if key.len() > MAX_KEY_FIELD_LEN {
            return Err(ProtocolError::InvalidRecord(format!(
                "Key field too long: {} bytes",
                key.len()
            )));
        }
        if !key.bytes().all(is_base64_byte) {
            return Err(ProtocolError::InvalidRecord(
                "Key field is not base64".to_string(),
            ));
        }
    }

    Ok(())
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

/// Compare the record token to `expected` byte-for-byte.
/// A missing token never matches.
pub fn token_matches(record: &HandshakeRecord, expected: &str) -> bool {
    match &record.token {
        Some(token) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("secret", "secret", true ; "equal")]
    #[test_case("secret", "secreT", false ; "one byte differs")]
    #[test_case("secret", "secret2", false ; "length differs")]
    #[test_case("", "", true ; "both empty")]
    fn test_token_matches(token: &str, expected: &str, result: bool) {
        assert_eq!(token_matches(&HandshakeRecord::with_token(token), expected), result);
    }

    #[test]
    fn test_missing_token_never_matches() {
        assert!(!token_matches(&HandshakeRecord::default(), ""));
    }

    #[test]
    fn test_field_limits() {
        assert!(validate_record(&HandshakeRecord::with_token("a".repeat(64))).is_ok());
        assert!(validate_record(&HandshakeRecord::with_token("a".repeat(65))).is_err());

        let ok = HandshakeRecord::with_token_and_key("t", "A".repeat(128));
        assert!(validate_record(&ok).is_ok());
        let long = HandshakeRecord::with_token_and_key("t", "A".repeat(129));
        assert!(validate_record(&long).is_err());
        let bad = HandshakeRecord::with_token_and_key("t", "not base64!");
        assert!(validate_record(&bad).is_err());
    }
}
