// Export all modules for public use
pub mod config;
pub mod crypto;
pub mod protocol;
pub mod server;
pub mod types;
pub mod utils;

// Re-export the most commonly used items for convenience
pub use crate::config::{HandshakeRole, LinkConfig, ProtocolKind};
pub use crate::crypto::CryptoEngine;
pub use crate::protocol::{create_protocol, HandshakeState, Protocol};
pub use crate::server::{Connection, DeviceServer, StreamTransport, Transport};
pub use crate::types::{LinkError, Result};
