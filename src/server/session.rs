// src/server/session.rs
//! Connection manager for one byte-stream endpoint.
//!
//! A `Connection` starts in plaintext line mode. When a line ending with
//! the trigger suffix arrives (or `upgrade` is called locally) it switches
//! to guarded mode and hands every later byte to the protocol. One reader
//! thread and one sender thread run per connection.

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::constants::{IDLE_RETRY_DELAY, READ_BUFFER_SIZE, SENDER_POLL_INTERVAL};
use crate::config::LinkConfig;
use crate::protocol::{
    create_protocol, HandshakeState, MessageFn, Protocol, ProtocolError, ReadyFn, WriteFn,
};
use crate::server::connection::{ByteStream, StreamTransport, Transport};
use crate::server::lines::{LineAccumulator, LineEvent};
use crate::utils::{hex_preview, sanitize_log};

/// Error type for connection operations
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Endpoint is not open")]
    EndpointClosed,

    #[error("Connection is already running")]
    AlreadyRunning,

    #[error("Connection is not running")]
    NotRunning,

    #[error("Line sends are not allowed in guarded mode")]
    Guarded,

    #[error("Connection is already in guarded mode")]
    AlreadyGuarded,

    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, io::Error),

    #[error("Outbound queue is closed")]
    QueueClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Receives plaintext lines before the upgrade
pub type LineFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Fired once when the connection ends
pub type CloseFn = Arc<dyn Fn() + Send + Sync>;

enum Outbound {
    Payload(Vec<u8>),
    Shutdown,
}

/// What an enqueuer needs. `closed` disconnects when the connection stops,
/// releasing callers blocked on a full queue.
#[derive(Clone)]
struct Outlet {
    tx: Sender<Outbound>,
    closed: Receiver<()>,
}

/// Protocol events raised while an upgrade holds the line lock
enum Held {
    Ready,
    Message(Vec<u8>),
}

#[derive(Default)]
struct Callbacks {
    on_data: Option<MessageFn>,
    on_line: Option<LineFn>,
    on_ready: Option<ReadyFn>,
    on_close: Option<CloseFn>,
}

struct Inner {
    transport: Box<dyn Transport>,
    config: LinkConfig,
    running: AtomicBool,
    guarded: AtomicBool,
    close_notified: AtomicBool,
    write_lock: Mutex<()>,
    // Held for all plaintext processing and for the switch to guarded mode
    lines: Mutex<LineAccumulator>,
    protocol: RwLock<Option<Arc<dyn Protocol>>>,
    outbound: Mutex<Option<Outlet>>,
    closer: Mutex<Option<Sender<()>>>,
    // Some while ready and data callbacks are being held back
    held: Mutex<Option<Vec<Held>>>,
    callbacks: RwLock<Callbacks>,
    reader: Mutex<Option<JoinHandle<()>>>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

/// One managed endpoint
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new<T: Transport + 'static>(transport: T, config: LinkConfig) -> Self {
        let lines = LineAccumulator::new(config.trigger_suffix.clone(), config.max_line_bytes);
        Self {
            inner: Arc::new(Inner {
                transport: Box::new(transport),
                config,
                running: AtomicBool::new(false),
                guarded: AtomicBool::new(false),
                close_notified: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                lines: Mutex::new(lines),
                protocol: RwLock::new(None),
                outbound: Mutex::new(None),
                closer: Mutex::new(None),
                held: Mutex::new(None),
                callbacks: RwLock::new(Callbacks::default()),
                reader: Mutex::new(None),
                sender: Mutex::new(None),
            }),
        }
    }

    /// Wrap a blocking socket using the configured read poll interval
    pub fn over_stream<S: ByteStream>(stream: S, config: LinkConfig) -> io::Result<Self> {
        let transport = StreamTransport::new(stream, config.read_poll_interval())?;
        Ok(Self::new(transport, config))
    }

    pub fn set_data_callback<F: Fn(Vec<u8>) + Send + Sync + 'static>(&self, f: F) {
        self.inner.callbacks.write().on_data = Some(Arc::new(f));
    }

    pub fn set_line_callback<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        self.inner.callbacks.write().on_line = Some(Arc::new(f));
    }

    pub fn set_ready_callback<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.callbacks.write().on_ready = Some(Arc::new(f));
    }

    pub fn set_close_callback<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.callbacks.write().on_close = Some(Arc::new(f));
    }

    /// Create the protocol and the outbound queue, then spawn the sender
    /// and reader threads.
    pub fn start(&self) -> Result<(), ConnectionError> {
        let inner = &self.inner;
        if !inner.transport.is_open() {
            return Err(ConnectionError::EndpointClosed);
        }
        if inner.running.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::AlreadyRunning);
        }

        let protocol = match create_protocol(&inner.config) {
            Ok(protocol) => protocol,
            Err(e) => {
                inner.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        let weak = Arc::downgrade(inner);
        protocol.set_ready_callback(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.notify_ready();
            }
        }));
        *inner.protocol.write() = Some(protocol);
        inner.guarded.store(false, Ordering::Release);
        inner.lines.lock().clear();

        let (tx, rx) = bounded(inner.config.queue_depth);
        let (closer, closed) = bounded(0);
        *inner.outbound.lock() = Some(Outlet { tx, closed });
        *inner.closer.lock() = Some(closer);

        let sender_inner = inner.clone();
        let sender = thread::Builder::new()
            .name("guardlink-sender".into())
            .spawn(move || sender_inner.sender_loop(rx))
            .map_err(|e| {
                inner.running.store(false, Ordering::Release);
                inner.outbound.lock().take();
                inner.closer.lock().take();
                ConnectionError::Spawn("sender", e)
            })?;
        *inner.sender.lock() = Some(sender);

        let reader_inner = inner.clone();
        match thread::Builder::new()
            .name("guardlink-reader".into())
            .spawn(move || reader_inner.reader_loop())
        {
            Ok(reader) => {
                *inner.reader.lock() = Some(reader);
                info!(
                    protocol = %inner.config.protocol,
                    "Connection started"
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn reader thread: {}", e);
                inner.stop();
                Err(ConnectionError::Spawn("reader", e))
            }
        }
    }

    /// Tear the connection down. Safe to call more than once and from any
    /// thread, including from inside callbacks.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Switch to guarded mode from this side. Bytes already received
    /// without a line terminator are handed to the protocol.
    pub fn upgrade(&self) -> Result<(), ConnectionError> {
        self.upgrade_with(None)
    }

    /// Send `trigger_line` and switch to guarded mode with no window in
    /// which the peer's first binary bytes could be read as text.
    pub fn request_upgrade(&self, trigger_line: &str) -> Result<(), ConnectionError> {
        self.upgrade_with(Some(trigger_line))
    }

    fn upgrade_with(&self, trigger_line: Option<&str>) -> Result<(), ConnectionError> {
        if !self.is_running() {
            return Err(ConnectionError::NotRunning);
        }
        let mut lines = self.inner.lines.lock();
        if self.inner.guarded.load(Ordering::Acquire) {
            return Err(ConnectionError::AlreadyGuarded);
        }
        if let Some(line) = trigger_line {
            self.inner.write_bytes(format!("{}\n", line).as_bytes())?;
        }
        let pending = lines.take_pending();
        self.inner.enter_guarded_mode(&mut lines, &pending)?;
        drop(lines);
        self.inner.release_held();
        Ok(())
    }

    /// Write raw bytes in plaintext mode
    pub fn send_bytes(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.is_guarded() {
            return Err(ConnectionError::Guarded);
        }
        if !self.inner.transport.is_open() {
            return Err(ConnectionError::EndpointClosed);
        }
        self.inner.write_bytes(data)?;
        Ok(())
    }

    /// Write text without a terminator in plaintext mode
    pub fn send_string(&self, s: &str) -> Result<(), ConnectionError> {
        self.send_bytes(s.as_bytes())
    }

    /// Write one newline-terminated line in plaintext mode
    pub fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.send_bytes(&bytes)
    }

    /// Queue a payload for the sender thread. Blocks while the queue is
    /// full, until the sender makes room or the connection stops.
    pub fn enqueue_send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if !self.is_running() {
            return Err(ConnectionError::NotRunning);
        }
        let Outlet { tx, closed } = self
            .inner
            .outbound
            .lock()
            .clone()
            .ok_or(ConnectionError::QueueClosed)?;
        select! {
            send(tx, Outbound::Payload(payload)) -> sent => {
                sent.map_err(|_| ConnectionError::QueueClosed)
            }
            recv(closed) -> _ => Err(ConnectionError::QueueClosed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_guarded(&self) -> bool {
        self.inner.guarded.load(Ordering::Acquire)
    }

    pub fn protocol_state(&self) -> HandshakeState {
        self.inner
            .protocol
            .read()
            .as_ref()
            .map(|p| p.state())
            .unwrap_or(HandshakeState::Uninitialized)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn protocol(&self) -> Option<Arc<dyn Protocol>> {
        self.protocol.read().clone()
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("Stopping connection");

        if let Some(protocol) = self.protocol() {
            protocol.close();
        }
        self.transport.close();
        if let Some(outlet) = self.outbound.lock().take() {
            match outlet.tx.try_send(Outbound::Shutdown) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                // The sender notices `running` on its next poll
                Err(TrySendError::Full(_)) => trace!("Outbound queue full at shutdown"),
            }
        }
        // Wakes enqueuers blocked on a full queue so the reader can be joined
        self.closer.lock().take();

        let current = thread::current().id();
        for slot in [&self.sender, &self.reader] {
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                if handle.thread().id() != current && handle.join().is_err() {
                    error!("Connection thread panicked");
                }
            }
        }

        self.notify_close();
        info!("Connection stopped");
    }

    fn notify_close(&self) {
        if self.close_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        let on_close = self.callbacks.read().on_close.clone();
        if let Some(on_close) = on_close {
            on_close();
        }
    }

    fn notify_ready(&self) {
        info!("Guarded channel ready");
        if let Some(held) = self.held.lock().as_mut() {
            held.push(Held::Ready);
            return;
        }
        self.fire_ready();
    }

    fn deliver(&self, message: Vec<u8>) {
        trace!("Message: {}", hex_preview(&message, 32));
        if let Some(held) = self.held.lock().as_mut() {
            held.push(Held::Message(message));
            return;
        }
        self.fire_message(message);
    }

    fn fire_ready(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let on_ready = self.callbacks.read().on_ready.clone();
        if let Some(on_ready) = on_ready {
            on_ready();
        }
    }

    fn fire_message(&self, message: Vec<u8>) {
        if !self.running.load(Ordering::Acquire) {
            debug!(bytes = message.len(), "Dropping message after stop");
            return;
        }
        let on_data = self.callbacks.read().on_data.clone();
        if let Some(on_data) = on_data {
            on_data(message);
        }
    }

    /// Fire events held back by `enter_guarded_mode`. Must run without the
    /// line lock. Events the reader raises meanwhile join the queue so
    /// ordering is kept.
    fn release_held(&self) {
        loop {
            let batch = {
                let mut held = self.held.lock();
                let batch = held.as_mut().map(std::mem::take).unwrap_or_default();
                if batch.is_empty() {
                    *held = None;
                    return;
                }
                batch
            };
            for event in batch {
                match event {
                    Held::Ready => self.fire_ready(),
                    Held::Message(message) => self.fire_message(message),
                }
            }
        }
    }

    /// Serialized write of one buffer. Fatal errors stop the connection.
    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        let result = {
            let _guard = self.write_lock.lock();
            self.transport.write_all(data)
        };
        if let Err(e) = &result {
            if !matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ) {
                error!("Write failed: {}", e);
                self.stop();
            }
        }
        result
    }

    /// Initialise the protocol and feed it `buffered`. The guarded flag is
    /// raised last so the reader cannot hand newer bytes over first.
    /// Callbacks raised here are held until the caller drops the line lock
    /// and calls `release_held`.
    fn enter_guarded_mode(
        self: &Arc<Self>,
        lines: &mut MutexGuard<'_, LineAccumulator>,
        buffered: &[u8],
    ) -> Result<(), ConnectionError> {
        let protocol = self.protocol().ok_or(ConnectionError::NotRunning)?;

        let writer_ref: Weak<Inner> = Arc::downgrade(self);
        let writer: WriteFn = Arc::new(move |bytes: &[u8]| match writer_ref.upgrade() {
            Some(inner) => inner.write_bytes(bytes),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection dropped")),
        });
        let message_ref = Arc::downgrade(self);
        let on_message: MessageFn = Arc::new(move |message: Vec<u8>| {
            if let Some(inner) = message_ref.upgrade() {
                inner.deliver(message);
            }
        });

        lines.clear();
        *self.held.lock() = Some(Vec::new());
        if let Err(e) = protocol.init(writer, on_message) {
            self.held.lock().take();
            return Err(e.into());
        }
        if !buffered.is_empty() {
            debug!(bytes = buffered.len(), "Handing buffered bytes to protocol");
            protocol.append_received(buffered);
        }
        self.guarded.store(true, Ordering::Release);
        info!(protocol = %self.config.protocol, "Entered guarded mode");
        Ok(())
    }

    fn handle_incoming(self: &Arc<Self>, data: &[u8]) {
        if !self.guarded.load(Ordering::Acquire) {
            // A local upgrade may hold the lock while it stops the connection
            let mut lines = loop {
                if let Some(lines) = self.lines.try_lock_for(SENDER_POLL_INTERVAL) {
                    break lines;
                }
                if !self.running.load(Ordering::Acquire) {
                    return;
                }
            };
            if !self.guarded.load(Ordering::Acquire) {
                self.handle_plaintext(&mut lines, data);
                return;
            }
        }
        if let Some(protocol) = self.protocol() {
            protocol.append_received(data);
        }
    }

    fn handle_plaintext(self: &Arc<Self>, lines: &mut MutexGuard<'_, LineAccumulator>, data: &[u8]) {
        for event in lines.push(data) {
            // A line callback may have stopped the connection
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            match event {
                LineEvent::Line(line) => {
                    if self.guarded.load(Ordering::Acquire) {
                        debug!("Dropping line received during local upgrade");
                        continue;
                    }
                    let on_line = self.callbacks.read().on_line.clone();
                    if let Some(on_line) = on_line {
                        // The callback may send or upgrade
                        MutexGuard::unlocked(lines, || on_line(&line));
                    } else {
                        debug!("Line with no handler: {}", sanitize_log(&line));
                    }
                }
                LineEvent::Upgrade { trigger, remainder } => {
                    info!("Upgrade requested by peer: {}", sanitize_log(&trigger));
                    if self.guarded.load(Ordering::Acquire) {
                        if let Some(protocol) = self.protocol().filter(|_| !remainder.is_empty()) {
                            protocol.append_received(&remainder);
                        }
                    } else {
                        match self.enter_guarded_mode(lines, &remainder) {
                            Ok(()) => MutexGuard::unlocked(lines, || self.release_held()),
                            Err(e) => {
                                error!("Upgrade failed: {}", e);
                                self.stop();
                            }
                        }
                    }
                    return;
                }
            }
        }
    }

    fn reader_loop(self: Arc<Self>) {
        debug!("Reader thread started");
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        while self.running.load(Ordering::Acquire) {
            match self.transport.read_available(&mut buf) {
                Ok(0) => thread::sleep(IDLE_RETRY_DELAY),
                Ok(n) => {
                    trace!(bytes = n, "Read {}", hex_preview(&buf[..n], 16));
                    self.handle_incoming(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(IDLE_RETRY_DELAY),
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        info!("Reader stopping: {}", e);
                    }
                    break;
                }
            }
        }
        self.stop();
        debug!("Reader thread exited");
    }

    fn sender_loop(self: Arc<Self>, rx: Receiver<Outbound>) {
        debug!("Sender thread started");
        loop {
            match rx.recv_timeout(SENDER_POLL_INTERVAL) {
                Ok(Outbound::Payload(payload)) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(protocol) = self.protocol() else {
                        break;
                    };
                    if let Err(e) = protocol.send(&payload) {
                        warn!(bytes = payload.len(), "Dropping queued payload: {}", e);
                    }
                }
                Ok(Outbound::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Sender thread exited");
    }
}
