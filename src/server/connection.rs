// src/server/connection.rs
//! Byte-stream endpoint abstraction.
//!
//! This module provides the `Transport` trait a `Connection` reads from and
//! writes to, and an implementation over blocking TCP and Unix sockets.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Raw duplex byte pipe owned by one connection.
///
/// `read_available` returns `Ok(0)` when nothing arrived within the poll
/// interval; a closed peer is reported as an error.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn read_available(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer in one call
    fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Close the endpoint. Later calls are no-ops.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Blocking socket usable from a reader and a writer thread at once
pub trait ByteStream: Send + Sync + 'static {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_bytes(&self, data: &[u8]) -> io::Result<()>;
    fn set_poll_timeout(&self, timeout: Duration) -> io::Result<()>;
    fn shutdown_both(&self) -> io::Result<()>;
}

macro_rules! impl_byte_stream {
    ($stream:ty) => {
        impl ByteStream for $stream {
            fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
                let mut stream = self;
                stream.read(buf)
            }

            fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
                let mut stream = self;
                stream.write_all(data)?;
                stream.flush()
            }

            fn set_poll_timeout(&self, timeout: Duration) -> io::Result<()> {
                self.set_read_timeout(Some(timeout))
            }

            fn shutdown_both(&self) -> io::Result<()> {
                self.shutdown(Shutdown::Both)
            }
        }
    };
}

impl_byte_stream!(TcpStream);
impl_byte_stream!(UnixStream);

/// `Transport` over a blocking socket with a read poll timeout
pub struct StreamTransport<S: ByteStream> {
    stream: S,
    open: AtomicBool,
}

impl<S: ByteStream> StreamTransport<S> {
    pub fn new(stream: S, poll_interval: Duration) -> io::Result<Self> {
        stream.set_poll_timeout(poll_interval)?;
        Ok(Self {
            stream,
            open: AtomicBool::new(true),
        })
    }
}

impl<S: ByteStream> Transport for StreamTransport<S> {
    fn read_available(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        match self.stream.read_some(buf) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the stream",
            )),
            Ok(n) => {
                trace!("Read {} bytes from stream", n);
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        self.stream.write_bytes(data)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.stream.shutdown_both() {
                debug!("Shutdown on close failed: {}", e);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
