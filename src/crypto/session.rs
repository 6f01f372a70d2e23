// src/crypto/session.rs
//! Per-connection crypto state.
//!
//! `CryptoEngine` owns the optional ephemeral key pair and the installed
//! session key. Key agreement and key derivation only install a key; all
//! protocol variants then share the same seal/open path.

use tracing::{debug, info};

use crate::crypto::encryption::{EncryptionError, SessionKey};
use crate::crypto::keys::{derive_passphrase_key, EphemeralKeyPair, KeyError};

/// Crypto primitives bound to one protocol instance
#[derive(Debug, Default)]
pub struct CryptoEngine {
    key_pair: Option<EphemeralKeyPair>,
    session_key: Option<SessionKey>,
}

impl CryptoEngine {
    /// Create an engine with no key material
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine whose session key is derived from `passphrase`
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, KeyError> {
        let mut engine = Self::new();
        engine.derive_key_from_passphrase(passphrase, salt)?;
        Ok(engine)
    }

    /// Create an engine holding a fresh ephemeral key pair
    pub fn ephemeral() -> Self {
        let mut engine = Self::new();
        engine.generate_key_pair();
        engine
    }

    /// Generate (or replace) the ephemeral P-256 key pair
    pub fn generate_key_pair(&mut self) {
        self.key_pair = Some(EphemeralKeyPair::generate());
    }

    /// Uncompressed SEC1 encoding of the local public key
    pub fn export_public_key(&self) -> Result<Vec<u8>, KeyError> {
        self.key_pair
            .as_ref()
            .map(EphemeralKeyPair::public_key_bytes)
            .ok_or(KeyError::NoKeyPair)
    }

    /// Base64 of the exported public key
    pub fn encode_public_key_base64(&self) -> Result<String, KeyError> {
        self.key_pair
            .as_ref()
            .map(EphemeralKeyPair::public_key_base64)
            .ok_or(KeyError::NoKeyPair)
    }

    /// Agree with the peer's base64 public key and install the derived
    /// AES-128 key.
    pub fn agree_and_derive_key(&mut self, peer_public_b64: &str) -> Result<(), KeyError> {
        let pair = self.key_pair.as_ref().ok_or(KeyError::NoKeyPair)?;
        let key = pair.agree(peer_public_b64)?;
        self.session_key = Some(SessionKey::from_bytes(&key)?);
        info!("Session key installed from key agreement (AES-128-GCM)");
        Ok(())
    }

    /// Derive an AES-256 key from the passphrase and install it
    pub fn derive_key_from_passphrase(&mut self, passphrase: &str, salt: &[u8]) -> Result<(), KeyError> {
        let key = derive_passphrase_key(passphrase, salt)?;
        self.session_key = Some(SessionKey::from_bytes(&key)?);
        debug!("Session key installed from passphrase (AES-256-GCM)");
        Ok(())
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair.is_some()
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Seal `plaintext` as `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.session_key
            .as_ref()
            .ok_or(EncryptionError::NoSessionKey)?
            .seal(plaintext)
    }

    /// Verify and open a sealed frame payload
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.session_key
            .as_ref()
            .ok_or(EncryptionError::NoSessionKey)?
            .open(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::{MAX_SEALED_PLAINTEXT, PASSPHRASE_SALT};
    use quickcheck::{quickcheck, TestResult};

    fn agreed_pair() -> (CryptoEngine, CryptoEngine) {
        let mut a = CryptoEngine::ephemeral();
        let mut b = CryptoEngine::ephemeral();
        let a_pub = a.encode_public_key_base64().unwrap();
        let b_pub = b.encode_public_key_base64().unwrap();
        a.agree_and_derive_key(&b_pub).unwrap();
        b.agree_and_derive_key(&a_pub).unwrap();
        (a, b)
    }

    #[test]
    fn test_no_key_material() {
        let engine = CryptoEngine::new();
        assert!(matches!(engine.export_public_key(), Err(KeyError::NoKeyPair)));
        assert!(matches!(engine.encode_public_key_base64(), Err(KeyError::NoKeyPair)));
        assert_eq!(engine.encrypt(b"x"), Err(EncryptionError::NoSessionKey));
        assert_eq!(engine.decrypt(&[0u8; 40]), Err(EncryptionError::NoSessionKey));
    }

    #[test]
    fn test_agreement_cross_decrypt() {
        let (a, b) = agreed_pair();
        let sealed = a.encrypt(b"PING").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"PING".to_vec());

        let reply = b.encrypt(b"PONG").unwrap();
        assert_eq!(a.decrypt(&reply).unwrap(), b"PONG".to_vec());
    }

    #[test]
    fn test_agree_without_key_pair() {
        let mut engine = CryptoEngine::new();
        let other = CryptoEngine::ephemeral();
        let result = engine.agree_and_derive_key(&other.encode_public_key_base64().unwrap());
        assert!(matches!(result, Err(KeyError::NoKeyPair)));
        assert!(!engine.has_session_key());
    }

    #[test]
    fn test_failed_agreement_keeps_engine_unkeyed() {
        let mut engine = CryptoEngine::ephemeral();
        assert!(engine.agree_and_derive_key("AAAA").is_err());
        assert!(!engine.has_session_key());
    }

    #[test]
    fn test_passphrase_engines_interoperate() {
        let a = CryptoEngine::from_passphrase("shared", &PASSPHRASE_SALT).unwrap();
        let b = CryptoEngine::from_passphrase("shared", &PASSPHRASE_SALT).unwrap();
        let c = CryptoEngine::from_passphrase("different", &PASSPHRASE_SALT).unwrap();

        let sealed = a.encrypt(b"hello").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"hello".to_vec());
        assert_eq!(c.decrypt(&sealed), Err(EncryptionError::AuthenticationFailed));
    }

    #[test]
    fn test_corrupted_tag_yields_error() {
        let (a, b) = agreed_pair();
        let mut sealed = a.encrypt(b"telemetry").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert_eq!(b.decrypt(&sealed), Err(EncryptionError::AuthenticationFailed));
    }

    #[test]
    fn prop_roundtrip_within_frame_budget() {
        fn prop(payload: Vec<u8>) -> TestResult {
            if payload.len() > MAX_SEALED_PLAINTEXT {
                return TestResult::discard();
            }
            let (a, b) = agreed_pair();
            let sealed = a.encrypt(&payload).unwrap();
            TestResult::from_bool(b.decrypt(&sealed).unwrap() == payload)
        }
        quickcheck(prop as fn(Vec<u8>) -> TestResult);
    }
}
