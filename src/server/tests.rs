// src/server/tests.rs
//! End-to-end tests: a device and a controller `Connection` joined by a
//! socket pair, upgraded from line mode and exchanging guarded messages.

use super::{Connection, ConnectionError};
use crate::config::{HandshakeRole, LinkConfig, ProtocolKind};
use crate::protocol::HandshakeState;
use parking_lot::Mutex;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use test_case::test_case;

const TRIGGER: &str = "enable_guard";

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

struct Endpoint {
    connection: Connection,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    lines: Arc<Mutex<Vec<String>>>,
    ready: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Endpoint {
    fn new(stream: UnixStream, config: LinkConfig) -> Self {
        let connection = Connection::over_stream(stream, config).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let lines = Arc::new(Mutex::new(Vec::new()));
        let ready = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));

        let sink = received.clone();
        connection.set_data_callback(move |payload: Vec<u8>| sink.lock().push(payload));
        let sink = lines.clone();
        connection.set_line_callback(move |line: &str| sink.lock().push(line.to_string()));
        let count = ready.clone();
        connection.set_ready_callback(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let count = closes.clone();
        connection.set_close_callback(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            connection,
            received,
            lines,
            ready,
            closes,
        }
    }

    fn messages(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }
}

fn config(passphrase: &str, kind: ProtocolKind, role: HandshakeRole) -> LinkConfig {
    LinkConfig::new(passphrase, kind)
        .with_role(role)
        .with_send_timeout(Duration::from_millis(500))
}

/// Device answers as responder, controller drives the upgrade
fn linked(kind: ProtocolKind, device_pw: &str, controller_pw: &str) -> (Endpoint, Endpoint) {
    let (a, b) = UnixStream::pair().unwrap();
    let device = Endpoint::new(a, config(device_pw, kind, HandshakeRole::Responder));
    let controller = Endpoint::new(b, config(controller_pw, kind, HandshakeRole::Initiator));
    device.connection.start().unwrap();
    controller.connection.start().unwrap();
    controller.connection.request_upgrade(TRIGGER).unwrap();
    (device, controller)
}

#[test_case(ProtocolKind::Raw ; "raw")]
#[test_case(ProtocolKind::Passphrase ; "passphrase")]
#[test_case(ProtocolKind::Ephemeral ; "ephemeral")]
fn test_upgrade_and_exchange(kind: ProtocolKind) {
    let (device, controller) = linked(kind, "s3cret", "s3cret");

    let both_ready = || {
        device.ready.load(Ordering::SeqCst) == 1 && controller.ready.load(Ordering::SeqCst) == 1
    };
    assert!(wait_until(Duration::from_secs(3), both_ready));
    assert!(device.connection.is_guarded());
    assert_eq!(device.connection.protocol_state(), HandshakeState::Ready);
    assert!(device.lines.lock().is_empty());

    controller.connection.enqueue_send(b"status?".to_vec()).unwrap();
    device.connection.enqueue_send(b"temp=21".to_vec()).unwrap();
    device.connection.enqueue_send(vec![0xAB; 200]).unwrap();

    assert!(wait_until(Duration::from_secs(3), || device.messages().len() == 1
        && controller.messages().len() == 2));
    assert_eq!(device.messages(), vec![b"status?".to_vec()]);
    assert_eq!(
        controller.messages(),
        vec![b"temp=21".to_vec(), vec![0xAB; 200]]
    );

    controller.connection.stop();
    assert!(wait_until(Duration::from_secs(3), || {
        device.closes.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(controller.closes.load(Ordering::SeqCst), 1);
}

#[test_case(ProtocolKind::Raw ; "raw")]
#[test_case(ProtocolKind::Passphrase ; "passphrase")]
#[test_case(ProtocolKind::Ephemeral ; "ephemeral")]
fn test_mismatched_passphrase_never_delivers(kind: ProtocolKind) {
    let (device, controller) = linked(kind, "alpha", "bravo");

    controller.connection.enqueue_send(b"open sesame".to_vec()).unwrap();
    // Longer than the send timeout so the queued payload is dropped
    thread::sleep(Duration::from_millis(800));

    assert!(device.messages().is_empty());
    assert!(controller.messages().is_empty());
    assert_eq!(device.ready.load(Ordering::SeqCst), 0);
    assert_eq!(controller.ready.load(Ordering::SeqCst), 0);
    assert_eq!(
        controller.connection.protocol_state(),
        HandshakeState::AwaitingPeerHandshake
    );
    // Failed handshakes do not tear the link down
    assert!(device.connection.is_running());
    assert!(controller.connection.is_running());
}

#[test]
fn test_lines_before_upgrade() {
    let (a, b) = UnixStream::pair().unwrap();
    let device = Endpoint::new(a, config("pw", ProtocolKind::Raw, HandshakeRole::Responder));
    let controller = Endpoint::new(b, config("pw", ProtocolKind::Raw, HandshakeRole::Initiator));
    device.connection.start().unwrap();
    controller.connection.start().unwrap();

    controller.connection.send_line("status").unwrap();
    controller.connection.send_string("ver").unwrap();
    controller.connection.send_string("sion\r\n").unwrap();
    assert!(wait_until(Duration::from_secs(2), || device.lines.lock().len() == 2));
    assert_eq!(
        *device.lines.lock(),
        vec!["status".to_string(), "version".to_string()]
    );

    device.connection.send_line("OK").unwrap();
    assert!(wait_until(Duration::from_secs(2), || controller.lines.lock().len() == 1));
    assert!(!device.connection.is_guarded());

    // The trigger moves the device into guarded mode
    controller.connection.request_upgrade(TRIGGER).unwrap();
    assert!(wait_until(Duration::from_secs(2), || device.connection.is_guarded()));
    assert!(wait_until(Duration::from_secs(2), || {
        device.ready.load(Ordering::SeqCst) == 1
    }));
    assert!(matches!(
        controller.connection.request_upgrade(TRIGGER),
        Err(ConnectionError::AlreadyGuarded)
    ));
}

#[test]
fn test_stop_twice_fires_close_once() {
    let (device, controller) = linked(ProtocolKind::Passphrase, "pw", "pw");
    assert!(wait_until(Duration::from_secs(3), || {
        controller.ready.load(Ordering::SeqCst) == 1
    }));

    device.connection.stop();
    device.connection.stop();
    assert_eq!(device.closes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        device.connection.enqueue_send(b"late".to_vec()),
        Err(ConnectionError::NotRunning)
    ));

    // The peer sees the socket close and stops on its own
    assert!(wait_until(Duration::from_secs(3), || {
        controller.closes.load(Ordering::SeqCst) == 1
    }));
    assert!(!controller.connection.is_running());
}

#[test]
fn test_closed_endpoint_cannot_restart() {
    let (a, b) = UnixStream::pair().unwrap();
    let device = Endpoint::new(a, config("pw", ProtocolKind::Ephemeral, HandshakeRole::Responder));
    device.connection.start().unwrap();
    assert!(matches!(
        device.connection.start(),
        Err(ConnectionError::AlreadyRunning)
    ));
    drop(b);
    assert!(wait_until(Duration::from_secs(2), || !device.connection.is_running()));
    assert_eq!(device.closes.load(Ordering::SeqCst), 1);

    // A closed endpoint cannot be restarted
    assert!(matches!(
        device.connection.start(),
        Err(ConnectionError::EndpointClosed)
    ));
}
