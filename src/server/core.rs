// src/server/core.rs
//! Demo device server.
//!
//! Accepts TCP endpoints in place of the serial-profile server. Only one
//! endpoint is active at a time; a new one replaces the previous one.

use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::server::session::{Connection, ConnectionError};
use crate::utils::{bytes_to_hex, sanitize_log};

/// Reply sent for every plaintext line
const LINE_ACK: &str = "OK";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

struct ActiveConnection {
    id: u64,
    peer: SocketAddr,
    connection: Arc<Connection>,
}

pub struct DeviceServer {
    config: LinkConfig,
    echo: bool,
    state: RwLock<ServerState>,
    active: Arc<Mutex<Option<ActiveConnection>>>,
    shutdown: Notify,
    next_id: AtomicU64,
}

impl DeviceServer {
    pub fn new(config: LinkConfig, echo: bool) -> Arc<Self> {
        Arc::new(Self {
            config,
            echo,
            state: RwLock::new(ServerState::Created),
            active: Arc::new(Mutex::new(None)),
            shutdown: Notify::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn active_peer(&self) -> Option<SocketAddr> {
        self.active.lock().as_ref().map(|a| a.peer)
    }

    pub fn active_connection(&self) -> Option<Arc<Connection>> {
        self.active.lock().as_ref().map(|a| a.connection.clone())
    }

    /// Ask a running accept loop to exit
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Accept endpoints until `shutdown` is called
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        {
            let mut state = self.state.write();
            if *state != ServerState::Created && *state != ServerState::Stopped {
                return Err(ServerError::Internal(format!(
                    "Cannot start server in state {:?}",
                    *state
                )));
            }
            *state = ServerState::Running;
        }
        info!(
            protocol = %self.config.protocol,
            encrypted = self.config.protocol.is_encrypted(),
            "Device server running"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let stream = match stream.into_std().and_then(|s| {
                            s.set_nonblocking(false)?;
                            Ok(s)
                        }) {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!("Could not take over stream from {}: {}", peer, e);
                                continue;
                            }
                        };
                        let server = self.clone();
                        match tokio::task::spawn_blocking(move || server.attach(stream, peer)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("Rejected endpoint {}: {}", peer, e),
                            Err(e) => error!("Attach task failed: {}", e),
                        }
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }

        *self.state.write() = ServerState::ShuttingDown;
        let server = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || server.detach_active()).await {
            error!("Failed to stop active connection: {}", e);
        }
        *self.state.write() = ServerState::Stopped;
        info!("Device server stopped");
        Ok(())
    }

    /// Start a connection on `stream`, replacing the active one
    pub fn attach(&self, stream: std::net::TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        info!("Endpoint connected: {}", peer);
        self.detach_active();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::over_stream(stream, self.config.clone())?);
        self.install_callbacks(&connection, id, peer);
        connection.start()?;

        *self.active.lock() = Some(ActiveConnection {
            id,
            peer,
            connection,
        });
        Ok(())
    }

    fn detach_active(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            info!("Closing endpoint {}", previous.peer);
            previous.connection.stop();
        }
    }

    fn install_callbacks(&self, connection: &Arc<Connection>, id: u64, peer: SocketAddr) {
        let weak = Arc::downgrade(connection);
        connection.set_line_callback(move |line: &str| {
            info!("Line from {}: {}", peer, sanitize_log(line));
            if let Some(conn) = weak.upgrade() {
                if let Err(e) = conn.send_line(LINE_ACK) {
                    warn!("Failed to acknowledge line: {}", e);
                }
            }
        });

        let weak = Arc::downgrade(connection);
        let echo = self.echo;
        connection.set_data_callback(move |payload: Vec<u8>| {
            info!(bytes = payload.len(), "Message from {}: {}", peer, bytes_to_hex(&payload));
            if !echo {
                return;
            }
            if let Some(conn) = weak.upgrade() {
                if let Err(e) = conn.enqueue_send(payload) {
                    warn!("Failed to echo message: {}", e);
                }
            }
        });

        connection.set_ready_callback(move || info!("Guarded channel with {} ready", peer));

        let active = self.active.clone();
        connection.set_close_callback(move || {
            debug!("Endpoint {} closed", peer);
            let finished = {
                let mut slot = active.lock();
                match slot.as_ref() {
                    Some(current) if current.id == id => slot.take(),
                    _ => None,
                }
            };
            drop(finished);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolKind;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lines_acknowledged_and_endpoint_replaced() {
        let server = DeviceServer::new(LinkConfig::new("pw", ProtocolKind::Raw), false);
        let listener = DeviceServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(server.clone().run(listener));

        let first = tokio::task::spawn_blocking(move || {
            let stream = std::net::TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut writer = stream.try_clone().unwrap();
            writer.write_all(b"status\n").unwrap();
            let mut reader = BufReader::new(stream);
            let mut reply = String::new();
            reader.read_line(&mut reply).unwrap();
            (reply, reader)
        })
        .await
        .unwrap();
        assert_eq!(first.0, "OK\n");
        assert_eq!(server.state(), ServerState::Running);
        let first_peer = server.active_peer().unwrap();

        let mut first_reader = first.1;
        let check = server.clone();
        tokio::task::spawn_blocking(move || {
            let _second = std::net::TcpStream::connect(addr).unwrap();
            assert!(wait_until(Duration::from_secs(2), || {
                check.active_peer().map_or(false, |p| p != first_peer)
            }));
            // The replaced endpoint sees end of stream
            let mut rest = Vec::new();
            assert_eq!(first_reader.read_to_end(&mut rest).unwrap(), 0);
        })
        .await
        .unwrap();

        server.shutdown();
        task.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.active_peer().is_none());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let server = DeviceServer::new(LinkConfig::default(), false);
        *server.state.write() = ServerState::Running;
        let listener = DeviceServer::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.run(listener).await,
            Err(ServerError::Internal(_))
        ));
    }
}
