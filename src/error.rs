//! Error types for rossh.
//!
//! This module defines the fatal and task-level error kinds. Per-host
//! failures never use these types: they are confined to
//! [`crate::connection::ConnectionError`] and converted into
//! `HostResult::Failed` records by the dispatcher.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rossh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for rossh.
///
/// Every variant here is fatal for the invocation: it is reported before
/// any host is contacted and maps to a non-zero exit via
/// [`Error::exit_code`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is invalid or incomplete.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Error parsing the inventory file.
    #[error("failed to parse inventory '{path}': {message}")]
    InventoryParse {
        /// Path to the inventory file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// No target hosts could be resolved from arguments and inventory.
    #[error(
        "need target hosts: specify an inventory file with '-i' or provide \
         host/pattern/group positional arguments"
    )]
    NoHostsResolved,

    /// Invalid host pattern supplied on the command line.
    #[error("invalid host pattern: {0}")]
    InvalidHostPattern(String),

    /// Vault encryption/decryption failed outside of host processing.
    #[error("vault error: {0}")]
    Vault(String),

    /// Local staging failure (push archive creation, fetch dest setup).
    #[error("staging failed: {0}")]
    Staging(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error from the configuration file.
    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a new inventory parse error.
    pub fn inventory_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InventoryParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// Per-host failures are reported, not fatal, so they never reach this
    /// path; everything here exits 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_fatal() {
        assert_eq!(Error::NoHostsResolved.exit_code(), 1);
        assert_eq!(Error::ConfigInvalid("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_inventory_parse_display() {
        let err = Error::inventory_parse("/etc/hosts.ini", "bad section");
        let msg = err.to_string();
        assert!(msg.contains("/etc/hosts.ini"));
        assert!(msg.contains("bad section"));
    }
}
