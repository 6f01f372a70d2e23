// src/protocol/ephemeral.rs
//! Ephemeral key-agreement variant.
//!
//! Each protocol instance holds a fresh P-256 key pair. The handshake
//! record binds the passphrase to the base64 public key and travels in
//! clear. A responder stays silent until the peer's record validates and
//! key agreement succeeds, then answers with its own record. An initiator
//! sends its record from `init` and completes on the answer.

use tracing::{debug, info};

use crate::config::constants::{CODE_AGREEMENT_REJECTED, MAX_SEALED_PLAINTEXT};
use crate::config::{HandshakeRole, ProtocolKind};
use crate::crypto::CryptoEngine;
use crate::protocol::framed::HandshakeScheme;
use crate::protocol::serialization::{decode_record, encode_record};
use crate::protocol::types::{HandshakeRecord, ProtocolError};
use crate::protocol::validation::token_matches;

pub struct EphemeralScheme {
    passphrase: String,
    role: HandshakeRole,
    engine: CryptoEngine,
}

impl EphemeralScheme {
    pub fn new(passphrase: &str, role: HandshakeRole) -> Self {
        Self {
            passphrase: passphrase.to_string(),
            role,
            engine: CryptoEngine::ephemeral(),
        }
    }

    fn local_record(&self) -> Result<Vec<u8>, ProtocolError> {
        let public = self.engine.encode_public_key_base64()?;
        encode_record(&HandshakeRecord::with_token_and_key(
            self.passphrase.clone(),
            public,
        ))
    }
}

impl HandshakeScheme for EphemeralScheme {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Ephemeral
    }

    fn opening(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        // Fresh key material for every handshake
        self.engine = CryptoEngine::ephemeral();
        match self.role {
            HandshakeRole::Initiator => self.local_record().map(Some),
            HandshakeRole::Responder => Ok(None),
        }
    }

    fn accept(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let reject = |reason: String| ProtocolError::rejected(CODE_AGREEMENT_REJECTED, reason);

        let record = decode_record(payload).map_err(|e| reject(e.to_string()))?;
        if !token_matches(&record, &self.passphrase) {
            return Err(reject("passphrase mismatch".to_string()));
        }
        let peer_key = record
            .key
            .as_deref()
            .ok_or_else(|| reject("missing public key".to_string()))?;

        // Encode the answer first; no key is installed if that fails
        let reply = match self.role {
            HandshakeRole::Responder => Some(self.local_record()?),
            HandshakeRole::Initiator => None,
        };

        self.engine
            .agree_and_derive_key(peer_key)
            .map_err(|e| reject(e.to_string()))?;
        info!("Key agreement complete ({:?})", self.role);
        debug!(reply = reply.is_some(), "Ephemeral handshake accepted");
        Ok(reply)
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
