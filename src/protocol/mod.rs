// src/protocol/mod.rs
//! Protocol module for guarded links.
//!
//! This module defines the framed protocol contract, its three handshake
//! variants, and the factory that picks one from configuration.

pub mod ephemeral;
pub mod framed;
pub mod gate;
pub mod passphrase;
pub mod raw;
pub mod serialization;
pub mod types;
pub mod validation;

use std::io;
use std::sync::Arc;

use crate::config::{LinkConfig, ProtocolKind};

// Re-export commonly used items
pub use framed::{FramedProtocol, HandshakeScheme};
pub use types::{HandshakeRecord, HandshakeState, ProtocolError};

/// Writes bytes to the underlying stream in one call
pub type WriteFn = Arc<dyn Fn(&[u8]) -> io::Result<()> + Send + Sync>;

/// Receives each opened application payload
pub type MessageFn = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Fired once when the handshake completes
pub type ReadyFn = Arc<dyn Fn() + Send + Sync>;

/// Contract shared by every protocol variant.
///
/// `append_received` is called from the reader thread only; `send` may be
/// called from any thread and blocks until the handshake completes.
pub trait Protocol: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Reset buffers, re-arm the ready gate and start the handshake
    fn init(&self, writer: WriteFn, on_message: MessageFn) -> Result<(), ProtocolError>;

    /// Feed raw bytes from the stream into the frame parser
    fn append_received(&self, data: &[u8]);

    /// Seal and write one payload, waiting for the handshake first
    fn send(&self, payload: &[u8]) -> Result<(), ProtocolError>;

    fn close(&self);

    fn set_ready_callback(&self, on_ready: ReadyFn);

    fn state(&self) -> HandshakeState;

    fn is_ready(&self) -> bool {
        self.state() == HandshakeState::Ready
    }
}

/// Build the protocol variant selected by `config`
pub fn create_protocol(config: &LinkConfig) -> Result<Arc<dyn Protocol>, ProtocolError> {
    let timeout = config.send_timeout();
    let protocol: Arc<dyn Protocol> = match config.protocol {
        ProtocolKind::Raw => Arc::new(FramedProtocol::new(
            raw::RawScheme::new(&config.passphrase),
            timeout,
        )),
        ProtocolKind::Passphrase => Arc::new(FramedProtocol::new(
            passphrase::PassphraseScheme::new(&config.passphrase)?,
            timeout,
        )),
        ProtocolKind::Ephemeral => Arc::new(FramedProtocol::new(
            ephemeral::EphemeralScheme::new(&config.passphrase, config.role),
            timeout,
        )),
    };
    tracing::debug!("Created {} protocol", config.protocol);
    Ok(protocol)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::HandshakeRole;
    use std::time::Duration;
    use test_case::test_case;

    fn config(kind: ProtocolKind, passphrase: &str) -> LinkConfig {
        LinkConfig::new(passphrase, kind).with_send_timeout(Duration::from_millis(200))
    }

    #[test_case(ProtocolKind::Raw ; "raw")]
    #[test_case(ProtocolKind::Passphrase ; "passphrase")]
    #[test_case(ProtocolKind::Ephemeral ; "ephemeral")]
    fn test_factory_variants_interoperate(kind: ProtocolKind) {
        let a = Peer::new(create_protocol(&config(kind, "pw").with_role(HandshakeRole::Initiator)).unwrap());
        let b = Peer::new(create_protocol(&config(kind, "pw")).unwrap());
        assert_eq!(a.protocol.kind(), kind);
        assert_eq!(a.protocol.state(), HandshakeState::Uninitialized);

        a.init();
        b.init();
        pump(&a, &b);

        assert!(a.protocol.is_ready());
        assert!(b.protocol.is_ready());
        assert_eq!(a.ready_count(), 1);
        assert_eq!(b.ready_count(), 1);

        a.protocol.send(b"hello").unwrap();
        b.protocol.send(b"world").unwrap();
        pump(&a, &b);
        assert_eq!(b.inbox.messages(), vec![b"hello".to_vec()]);
        assert_eq!(a.inbox.messages(), vec![b"world".to_vec()]);
    }

    #[test_case(ProtocolKind::Raw ; "raw")]
    #[test_case(ProtocolKind::Passphrase ; "passphrase")]
    #[test_case(ProtocolKind::Ephemeral ; "ephemeral")]
    fn test_mismatched_passphrase_never_ready(kind: ProtocolKind) {
        let a = Peer::new(create_protocol(&config(kind, "one").with_role(HandshakeRole::Initiator)).unwrap());
        let b = Peer::new(create_protocol(&config(kind, "two")).unwrap());
        a.init();
        b.init();
        pump(&a, &b);

        assert_eq!(a.protocol.state(), HandshakeState::AwaitingPeerHandshake);
        assert_eq!(b.protocol.state(), HandshakeState::AwaitingPeerHandshake);
        assert!(matches!(a.protocol.send(b"x"), Err(ProtocolError::HandshakeTimeout)));
        assert_eq!(a.ready_count(), 0);
    }

    #[test]
    fn test_close_releases_blocked_sender() {
        let protocol = create_protocol(&config(ProtocolKind::Raw, "pw").with_send_timeout(Duration::from_secs(5))).unwrap();
        let peer = Peer::new(protocol.clone());
        peer.init();

        let sender = {
            let protocol = protocol.clone();
            std::thread::spawn(move || protocol.send(b"late"))
        };
        std::thread::sleep(Duration::from_millis(50));
        protocol.close();

        assert!(matches!(sender.join().unwrap(), Err(ProtocolError::Closed)));
        assert_eq!(protocol.state(), HandshakeState::Closed);
        assert!(matches!(
            protocol.init(peer.wire.writer(), peer.inbox.callback()),
            Err(ProtocolError::Closed)
        ));
    }
}
