//! Jump host (bastion) support.
//!
//! A target session can be tunneled through one intermediate SSH server:
//! the engine authenticates to the jump host, opens a direct-tcpip channel
//! to the target, and runs the target handshake over that channel.

use std::fmt;

use super::auth::{AuthMethod, DefaultAuth};

/// Configuration of the jump host, with its own assembled auth methods.
#[derive(Debug, Clone)]
pub struct JumpHost {
    /// Hostname or IP of the jump host
    pub server: String,

    /// SSH port on the jump host
    pub port: u16,

    /// Login user on the jump host
    pub user: String,

    /// Ordered authentication methods for the jump host
    pub auth_methods: Vec<AuthMethod>,
}

impl JumpHost {
    /// Build the jump host from its sub-config.
    ///
    /// Proxy authentication is assembled like host authentication: agent
    /// keys, proxy identity files, then the proxy password, falling back
    /// to the default password when none is configured.
    pub async fn assemble(
        server: String,
        port: u16,
        user: String,
        identity_files: &[String],
        passphrase: Option<&str>,
        password: Option<String>,
        defaults: &DefaultAuth,
    ) -> Self {
        let mut auth_methods = Vec::new();

        if let Some((socket, keys)) = &defaults.agent {
            auth_methods.push(AuthMethod::Agent {
                socket: socket.clone(),
                keys: keys.clone(),
            });
        }

        let signers = super::auth::load_signers(
            &super::auth::expand_identity_files(identity_files),
            passphrase,
            "proxy",
        );
        if !signers.is_empty() {
            auth_methods.push(AuthMethod::Keys { signers });
        }

        let password = password.or_else(|| defaults.password.clone());
        if let Some(password) = password {
            auth_methods.push(AuthMethod::Password { password });
        }

        Self {
            server,
            port,
            user,
            auth_methods,
        }
    }

    /// Parse a `[user@]host[:port]` jump host specification.
    pub fn parse_spec(spec: &str) -> Option<(Option<String>, String, u16)> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        let (user, host_port) = match spec.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, spec),
        };

        match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok()?;
                Some((user, host.to_string(), port))
            }
            None => Some((user, host_port.to_string(), 22)),
        }
    }
}

impl fmt::Display for JumpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.server, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_forms() {
        assert_eq!(
            JumpHost::parse_spec("bastion"),
            Some((None, "bastion".into(), 22))
        );
        assert_eq!(
            JumpHost::parse_spec("ops@bastion"),
            Some((Some("ops".into()), "bastion".into(), 22))
        );
        assert_eq!(
            JumpHost::parse_spec("ops@bastion:2222"),
            Some((Some("ops".into()), "bastion".into(), 2222))
        );
        assert_eq!(JumpHost::parse_spec(""), None);
        assert_eq!(JumpHost::parse_spec("b:xx"), None);
    }
}
