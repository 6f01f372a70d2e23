// src/protocol/passphrase.rs
//! Pre-shared passphrase variant.
//!
//! The AES-256 key is derived with PBKDF2 before any I/O. Each side sends
//! an encrypted record carrying the fixed literal and accepts the peer once
//! that record opens under the same key and holds the literal.

use tracing::debug;

use crate::config::constants::{
    CODE_DECRYPT_FAILED, CODE_HANDSHAKE_REJECTED, HANDSHAKE_LITERAL, MAX_SEALED_PLAINTEXT,
    PASSPHRASE_SALT,
};
use crate::config::ProtocolKind;
use crate::crypto::CryptoEngine;
use crate::protocol::framed::HandshakeScheme;
use crate::protocol::serialization::{decode_record, encode_record};
use crate::protocol::types::{HandshakeRecord, ProtocolError};
use crate::protocol::validation::token_matches;

pub struct PassphraseScheme {
    engine: CryptoEngine,
}

impl PassphraseScheme {
    pub fn new(passphrase: &str) -> Result<Self, ProtocolError> {
        let engine = CryptoEngine::from_passphrase(passphrase, &PASSPHRASE_SALT)?;
        Ok(Self { engine })
    }
}

impl HandshakeScheme for PassphraseScheme {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Passphrase
    }

    fn opening(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let record = encode_record(&HandshakeRecord::with_token(HANDSHAKE_LITERAL))?;
        let sealed = self
            .engine
            .encrypt(&record)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Some(sealed))
    }

    fn accept(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let plain = self
            .engine
            .decrypt(payload)
            .map_err(|e| ProtocolError::rejected(CODE_DECRYPT_FAILED, e.to_string()))?;
        let record = decode_record(&plain)
            .map_err(|e| ProtocolError::rejected(CODE_HANDSHAKE_REJECTED, e.to_string()))?;
        if !token_matches(&record, HANDSHAKE_LITERAL) {
            return Err(ProtocolError::rejected(
                CODE_HANDSHAKE_REJECTED,
                "unexpected handshake literal",
            ));
        }
        debug!("Passphrase handshake literal verified");
        Ok(None)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.engine.encrypt(plaintext)?)
    }

    fn open(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.engine.decrypt(payload)?)
    }

    fn max_plaintext(&self) -> usize {
        MAX_SEALED_PLAINTEXT
    }
}
