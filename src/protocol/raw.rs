// src/protocol/raw.rs
//! Unencrypted variant.
//!
//! Both sides send a record holding the passphrase in clear and accept the
//! peer once its token matches. Frames carry plaintext afterwards. This
//! mode offers no confidentiality, the handshake included.

use tracing::debug;

use crate::config::constants::{CODE_HANDSHAKE_REJECTED, MAX_FRAME_PAYLOAD};
use crate::config::ProtocolKind;
use crate::protocol::framed::HandshakeScheme;
use crate::protocol::serialization::{decode_record, encode_record};
use crate::protocol::types::{HandshakeRecord, ProtocolError};
use crate::protocol::validation::token_matches;

pub struct RawScheme {
    passphrase: String,
}

impl RawScheme {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_string(),
        }
    }
}

impl HandshakeScheme for RawScheme {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Raw
    }

    fn opening(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        encode_record(&HandshakeRecord::with_token(self.passphrase.clone())).map(Some)
    }

    fn accept(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let record = decode_record(payload)
            .map_err(|e| ProtocolError::rejected(CODE_HANDSHAKE_REJECTED, e.to_string()))?;
        if !token_matches(&record, &self.passphrase) {
            return Err(ProtocolError::rejected(
                CODE_HANDSHAKE_REJECTED,
                "passphrase mismatch",
            ));
        }
        debug!("Raw handshake token accepted");
        Ok(None)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(payload.to_vec())
    }

    fn max_plaintext(&self) -> usize {
        MAX_FRAME_PAYLOAD
    }
}
