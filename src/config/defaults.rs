// src/config/defaults.rs
//! Default configuration values used when a setting is not provided.

/// Default listen address of the demo device server
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:7878";

/// Default address the controller connects to
pub const DEFAULT_CONNECT_ADDRESS: &str = "127.0.0.1:7878";

/// Factory passphrase, expected to be replaced on first setup
pub const DEFAULT_PASSPHRASE: &str = "guardlink";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Line the controller sends to request the upgrade
pub const DEFAULT_TRIGGER_LINE: &str = "enable_guard";
