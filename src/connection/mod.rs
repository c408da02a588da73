//! Connection layer for remote host communication.
//!
//! One SSH transport per target host, opened on worker pickup and closed on
//! return. The session protocol ([`ssh::SshConnection`]) runs the four
//! operation kinds; [`auth`] assembles the ordered authentication method
//! list; [`proxy`] tunnels sessions through an optional jump host.

pub mod auth;
pub mod proxy;
pub mod ssh;

pub use auth::AuthMethod;
pub use proxy::JumpHost;
pub use ssh::SshConnection;

use thiserror::Error;

/// Errors that can occur during per-host operations.
///
/// Every variant here is confined to the host it occurred on: the
/// dispatcher converts it into a `Failed` result and the task continues.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the TCP connection or SSH handshake.
    #[error("connect failed: {0}")]
    ConnectionFailed(String),

    /// Every authentication method was rejected.
    #[error("auth failed: {0}")]
    AuthenticationFailed(String),

    /// The per-host operation deadline fired.
    #[error("command timeout after {0} seconds")]
    CommandTimeout(u64),

    /// Remote command execution failed.
    #[error("remote execution failed: {0}")]
    RemoteExecError(String),

    /// File upload or download failed.
    #[error("transfer failed: {0}")]
    TransferError(String),

    /// A vault ciphertext for this host could not be decrypted.
    #[error("vault decrypt failed: {0}")]
    VaultDecryptError(String),
}

/// Result type for per-host operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// A host as consumed by the executor: effective coordinates after
/// inventory merging, plus the assembled authentication methods.
#[derive(Debug, Clone)]
pub struct TargetHost {
    /// User-facing identifier, unique across the task
    pub alias: String,

    /// TCP destination
    pub address: String,

    /// SSH port
    pub port: u16,

    /// Login user
    pub user: String,

    /// Login password, revealed from the vault where needed
    pub password: Option<String>,

    /// Ordered authentication methods, tried first to last
    pub auth_methods: Vec<AuthMethod>,
}

/// Options controlling remote command execution.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Wrap the command in `sudo -H -u <as_user> bash -c '...'`
    pub sudo: bool,

    /// Target user for sudo
    pub as_user: String,

    /// Exported as LANG/LC_ALL/LANGUAGE before the command
    pub lang: Option<String>,

    /// Login password, written once when the sudo prompt appears
    pub login_password: Option<String>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            sudo: false,
            as_user: "root".to_string(),
            lang: None,
            login_password: None,
        }
    }
}

/// Escape a string for safe use inside single quotes in a shell command.
pub(crate) fn escape_shell_arg(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_shell_arg() {
        assert_eq!(escape_shell_arg("hello"), "'hello'");
        assert_eq!(escape_shell_arg("a b"), "'a b'");
        assert_eq!(escape_shell_arg("it's"), "'it'\\''s'");
        assert_eq!(escape_shell_arg("$HOME`id`"), "'$HOME`id`'");
    }

    #[test]
    fn test_error_messages_carry_kind() {
        assert!(ConnectionError::CommandTimeout(5)
            .to_string()
            .contains("timeout"));
        assert!(ConnectionError::AuthenticationFailed("no methods".into())
            .to_string()
            .contains("auth"));
    }
}
