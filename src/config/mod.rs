// src/config/mod.rs
//! Configuration module for guardlink.
//!
//! This module holds the wire/protocol constants, the defaults used by the
//! binary, and the user-facing link settings.

pub mod constants;
pub mod defaults;
pub mod settings;

pub use settings::{Command, ConfigError, DeviceArgs, HandshakeRole, LinkConfig, ProtocolKind};
