// src/config/settings.rs
//! Link configuration settings.
//!
//! This module contains the configuration structures for a guarded link and
//! the command line arguments of the demo binary, plus loading, merging and
//! validation of user-provided settings.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::config::constants::{
    MAX_LINE_ACCUMULATION, MAX_TOKEN_LEN, OUTBOUND_QUEUE_DEPTH, READ_POLL_INTERVAL,
    SEND_READY_TIMEOUT, TRIGGER_SUFFIX,
};
use crate::config::defaults;

/// Error type for configuration-related operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protocol variant negotiated after the upgrade to guarded mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// No confidentiality; the passphrase travels in clear during the handshake
    #[value(name = "raw")]
    Raw,

    /// AES-256-GCM with a key derived from the shared passphrase
    #[value(name = "passphrase")]
    Passphrase,

    /// P-256 ephemeral key agreement bound to the passphrase, AES-128-GCM
    #[default]
    #[value(name = "ephemeral")]
    Ephemeral,
}

impl ProtocolKind {
    /// Get string representation for logs and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Passphrase => "passphrase",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Whether frames are encrypted once the handshake completes
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Raw)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side speaks first in the key-agreement handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeRole {
    /// Sends its own record from `init` and completes on the peer's answer
    Initiator,

    /// Waits for the peer's record and answers only after validating it
    #[default]
    Responder,
}

/// Settings of one guarded link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared passphrase bound into every handshake
    pub passphrase: String,

    /// Protocol variant used after the upgrade
    pub protocol: ProtocolKind,

    /// Role in the key-agreement handshake
    pub role: HandshakeRole,

    /// Suffix of the plaintext line that requests the upgrade
    pub trigger_suffix: String,

    /// How long `send` waits for the handshake, in milliseconds
    pub send_timeout_ms: u64,

    /// Bound of the outbound queue
    pub queue_depth: usize,

    /// Maximum unterminated plaintext kept before it is dropped
    pub max_line_bytes: usize,

    /// Read timeout of the endpoint, in milliseconds
    pub read_poll_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            passphrase: defaults::DEFAULT_PASSPHRASE.to_string(),
            protocol: ProtocolKind::default(),
            role: HandshakeRole::default(),
            trigger_suffix: TRIGGER_SUFFIX.to_string(),
            send_timeout_ms: SEND_READY_TIMEOUT.as_millis() as u64,
            queue_depth: OUTBOUND_QUEUE_DEPTH,
            max_line_bytes: MAX_LINE_ACCUMULATION,
            read_poll_ms: READ_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl LinkConfig {
    /// Create a config for the given passphrase and protocol, defaults elsewhere
    pub fn new(passphrase: impl Into<String>, protocol: ProtocolKind) -> Self {
        Self {
            passphrase: passphrase.into(),
            protocol,
            ..Self::default()
        }
    }

    /// Builder-style role override
    pub fn with_role(mut self, role: HandshakeRole) -> Self {
        self.role = role;
        self
    }

    /// Builder-style send timeout override
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// Build the link configuration from command line arguments.
    ///
    /// A config file, when given, is loaded first; explicit arguments then
    /// override the values it contains.
    pub fn from_args(args: &DeviceArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        if let Some(passphrase) = &args.passphrase {
            config.passphrase = passphrase.clone();
        }
        if let Some(protocol) = args.protocol {
            config.protocol = protocol;
        }
        if let Some(role) = args.role {
            config.role = role;
        }
        if let Some(timeout) = args.send_timeout_ms {
            config.send_timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passphrase.is_empty() {
            return Err(ConfigError::Invalid("Passphrase must not be empty".to_string()));
        }
        if self.passphrase.len() > MAX_TOKEN_LEN {
            return Err(ConfigError::Invalid(format!(
                "Passphrase is {} bytes, at most {} are allowed",
                self.passphrase.len(),
                MAX_TOKEN_LEN
            )));
        }
        if self.trigger_suffix.is_empty() || self.trigger_suffix.contains(['\n', '\r']) {
            return Err(ConfigError::Invalid(format!(
                "Invalid trigger suffix: {:?}",
                self.trigger_suffix
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Send timeout must be positive".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("Queue depth must be at least 1".to_string()));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid("Line buffer must be at least 1 byte".to_string()));
        }
        if self.read_poll_ms == 0 {
            return Err(ConfigError::Invalid("Read poll interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("Link configuration saved to {:?}", path.as_ref());
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// What the binary should do
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Act as the device: accept endpoints and wait for the upgrade request
    Serve {
        /// Address to listen on
        #[clap(long, default_value = defaults::DEFAULT_LISTEN_ADDRESS)]
        listen: String,

        /// Send every received message back to the peer
        #[clap(long)]
        echo: bool,
    },

    /// Act as the controller: connect, request the upgrade, forward stdin
    Connect {
        /// Device address
        #[clap(long, default_value = defaults::DEFAULT_CONNECT_ADDRESS)]
        address: String,

        /// Line sent to request the upgrade
        #[clap(long, default_value = defaults::DEFAULT_TRIGGER_LINE)]
        trigger_line: String,
    },
}

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "guardlink",
    about = "Guarded framed channel over a raw byte stream",
    version,
    author
)]
pub struct DeviceArgs {
    /// Configuration file path (JSON)
    #[clap(long)]
    pub config_file: Option<PathBuf>,

    /// Shared passphrase
    #[clap(long)]
    pub passphrase: Option<String>,

    /// Protocol variant
    #[clap(long, value_enum)]
    pub protocol: Option<ProtocolKind>,

    /// Role in the key-agreement handshake
    #[clap(long, value_enum)]
    pub role: Option<HandshakeRole>,

    /// Handshake wait for outgoing messages, in milliseconds
    #[clap(long)]
    pub send_timeout_ms: Option<u64>,

    /// Log level
    #[clap(long, default_value = defaults::DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Also write logs to this file (daily rotation)
    #[clap(long)]
    pub log_file: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}
