// src/protocol/framed.rs
//! Shared driver for the three protocol variants.
//!
//! `FramedProtocol` owns the receive buffer, the ready gate and the
//! callbacks. Everything that differs between variants (what goes into
//! the handshake frame, how the peer's is checked, how payloads are
//! sealed) lives behind `HandshakeScheme`.

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, trace, warn};

use crate::config::constants::CODE_DECRYPT_FAILED;
use crate::config::ProtocolKind;
use crate::protocol::gate::{GateStatus, ReadyGate};
use crate::protocol::serialization::{encode_frame, FrameCodec};
use crate::protocol::types::{HandshakeState, ProtocolError};
use crate::protocol::{MessageFn, Protocol, ReadyFn, WriteFn};
use crate::utils::hex_preview;
use crate::utils::logging::log_security_event;

/// Zero-length frame written ahead of any handshake
const COMPAT_HEADER: [u8; 1] = [0x00];

/// Variant-specific half of a protocol
pub trait HandshakeScheme: Send + 'static {
    fn kind(&self) -> ProtocolKind;

    /// Payload of the handshake frame sent from `init`, if this side
    /// speaks first.
    fn opening(&mut self) -> Result<Option<Vec<u8>>, ProtocolError>;

    /// Check the peer's handshake payload. On success, returns the reply
    /// payload to send before the channel opens, if any.
    fn accept(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError>;

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    fn open(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Largest application payload that still fits in one frame
    fn max_plaintext(&self) -> usize;
}

pub struct FramedProtocol<S: HandshakeScheme> {
    scheme: Mutex<S>,
    kind: ProtocolKind,
    rx: Mutex<BytesMut>,
    gate: ReadyGate,
    state: Mutex<HandshakeState>,
    writer: RwLock<Option<WriteFn>>,
    on_message: RwLock<Option<MessageFn>>,
    on_ready: Mutex<Option<ReadyFn>>,
    send_timeout: Duration,
}

impl<S: HandshakeScheme> FramedProtocol<S> {
    pub fn new(scheme: S, send_timeout: Duration) -> Self {
        let kind = scheme.kind();
        Self {
            scheme: Mutex::new(scheme),
            kind,
            rx: Mutex::new(BytesMut::new()),
            gate: ReadyGate::new(),
            state: Mutex::new(HandshakeState::Uninitialized),
            writer: RwLock::new(None),
            on_message: RwLock::new(None),
            on_ready: Mutex::new(None),
            send_timeout,
        }
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let writer = self.writer.read().clone().ok_or(ProtocolError::NotInitialized)?;
        writer(bytes)?;
        Ok(())
    }

    fn write_frame(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let frame = encode_frame(payload)?;
        trace!("Writing frame: {}", hex_preview(&frame, 32));
        self.write_raw(&frame)
    }

    fn write_code(&self, code: u8) {
        if let Err(e) = self.write_raw(&[code]) {
            debug!("Could not report error code {:#04x}: {}", code, e);
        }
    }

    fn handle_frame(&self, frame: Vec<u8>) {
        if self.gate.is_open() {
            self.deliver(frame);
            return;
        }
        if frame.is_empty() {
            trace!("Ignoring zero-length frame before handshake");
            return;
        }

        let result = self.scheme.lock().accept(&frame);
        match result {
            Ok(reply) => {
                if let Some(reply) = reply {
                    if let Err(e) = self.write_frame(&reply) {
                        error!("Failed to send {} handshake reply: {}", self.kind, e);
                        return;
                    }
                }
                self.mark_ready();
            }
            Err(e) => {
                log_security_event(
                    "HANDSHAKE_REJECTED",
                    &format!("{} handshake: {}", self.kind, e),
                );
                self.write_code(e.wire_code());
            }
        }
    }

    fn mark_ready(&self) {
        {
            let mut state = self.state.lock();
            if *state == HandshakeState::Closed {
                return;
            }
            *state = HandshakeState::Ready;
        }
        if self.gate.open() {
            info!("{} handshake complete", self.kind);
            let on_ready = self.on_ready.lock().take();
            if let Some(on_ready) = on_ready {
                on_ready();
            }
        }
    }

    fn deliver(&self, frame: Vec<u8>) {
        let opened = self.scheme.lock().open(&frame);
        match opened {
            Ok(plaintext) => {
                debug!(bytes = plaintext.len(), "Delivering {} message", self.kind);
                let on_message = self.on_message.read().clone();
                if let Some(on_message) = on_message {
                    on_message(plaintext);
                }
            }
            Err(e) => {
                log_security_event(
                    "DECRYPT_FAILED",
                    &format!("{} frame of {} bytes: {}", self.kind, frame.len(), e),
                );
                self.write_code(CODE_DECRYPT_FAILED);
            }
        }
    }
}

impl<S: HandshakeScheme> Protocol for FramedProtocol<S> {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    fn init(&self, writer: WriteFn, on_message: MessageFn) -> Result<(), ProtocolError> {
        if self.gate.is_closed() {
            return Err(ProtocolError::Closed);
        }
        self.rx.lock().clear();
        self.gate.reset();
        *self.writer.write() = Some(writer);
        *self.on_message.write() = Some(on_message);
        *self.state.lock() = HandshakeState::AwaitingPeerHandshake;

        self.write_raw(&COMPAT_HEADER)?;
        let opening = self.scheme.lock().opening();
        match opening {
            Ok(Some(payload)) => self.write_frame(&payload)?,
            Ok(None) => debug!("{} waiting for peer handshake", self.kind),
            Err(e) => {
                error!("Failed to build {} handshake: {}", self.kind, e);
                self.write_code(e.wire_code());
                return Err(e);
            }
        }
        Ok(())
    }

    fn append_received(&self, data: &[u8]) {
        if self.gate.is_closed() {
            return;
        }
        let frames = {
            let mut rx = self.rx.lock();
            rx.extend_from_slice(data);
            let mut codec = FrameCodec;
            let mut frames = Vec::new();
            while let Ok(Some(frame)) = codec.decode(&mut rx) {
                frames.push(frame);
            }
            frames
        };
        for frame in frames {
            // A callback may have closed the protocol mid-batch
            if self.gate.is_closed() {
                debug!("{} closed, dropping remaining frames", self.kind);
                break;
            }
            self.handle_frame(frame);
        }
    }

    fn send(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let max = self.scheme.lock().max_plaintext();
        if payload.len() > max {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        match self.gate.wait(self.send_timeout) {
            GateStatus::Open => {}
            GateStatus::Closed => return Err(ProtocolError::Closed),
            GateStatus::TimedOut => {
                warn!("{} send timed out waiting for handshake", self.kind);
                return Err(ProtocolError::HandshakeTimeout);
            }
        }

        let sealed = self.scheme.lock().seal(payload)?;
        self.write_frame(&sealed)
    }

    fn close(&self) {
        *self.state.lock() = HandshakeState::Closed;
        self.gate.close();
        debug!("{} protocol closed", self.kind);
    }

    fn set_ready_callback(&self, on_ready: ReadyFn) {
        *self.on_ready.lock() = Some(on_ready);
    }

    fn state(&self) -> HandshakeState {
        *self.state.lock()
    }
}
