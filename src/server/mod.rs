// src/server/mod.rs
//! Server module for guardlink.
//!
//! This module provides the endpoint abstraction, the per-endpoint
//! connection manager, and the demo device server.

pub mod connection;
pub mod core;
pub mod lines;
pub mod session;

// Re-export commonly used items
pub use self::connection::{ByteStream, StreamTransport, Transport};
pub use self::core::{DeviceServer, ServerError};
pub use self::lines::{LineAccumulator, LineEvent};
pub use self::session::{Connection, ConnectionError};

#[cfg(test)]
mod tests;
