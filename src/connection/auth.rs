//! Authentication method assembly.
//!
//! Builds the ordered auth method list for a host: agent-held keys first,
//! then explicitly configured identity files (per-host before defaults),
//! then a password method. Encrypted identity files are retried with the
//! configured passphrase.

use russh_keys::agent::client::AgentClient;
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::load_secret_key;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;
use tracing::debug;

/// One authentication method, tried as a unit against a session.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Public keys held by a live SSH agent; workers sign through the
    /// socket, the key list itself is shared read-only.
    Agent {
        /// Path to the agent socket (`SSH_AUTH_SOCK`)
        socket: PathBuf,
        /// Public keys enumerated from the agent
        keys: Vec<PublicKey>,
    },

    /// Signers loaded from identity files.
    Keys {
        /// Loaded key pairs, in identity file order
        signers: Vec<Arc<KeyPair>>,
    },

    /// Plain password authentication.
    Password {
        /// The password, already revealed from the vault where needed
        password: String,
    },
}

/// Default authentication material, assembled once per task and shared by
/// every host that does not override it.
#[derive(Debug, Clone, Default)]
pub struct DefaultAuth {
    /// Agent socket and key list, when a live agent yields signers
    pub agent: Option<(PathBuf, Vec<PublicKey>)>,

    /// Signers loaded from the default identity files
    pub signers: Vec<Arc<KeyPair>>,

    /// Default login password
    pub password: Option<String>,
}

impl DefaultAuth {
    /// Enumerate the agent and load the default identity files.
    pub async fn assemble(
        identity_files: &[String],
        passphrase: Option<&str>,
        password: Option<String>,
    ) -> Self {
        let agent = agent_keys().await;
        let signers = load_signers(&expand_identity_files(identity_files), passphrase, "default");

        if agent.is_none() && signers.is_empty() && password.is_none() {
            debug!("default auth: no agent, identity files or password available");
        }

        Self {
            agent,
            signers,
            password,
        }
    }

    /// Build the ordered method list for one host.
    ///
    /// The agent keys are the first candidate; per-host identity files
    /// come before the defaults inside the public-key method; the host's
    /// effective password closes the list.
    pub fn methods_for_host(
        &self,
        host_signers: Vec<Arc<KeyPair>>,
        host_password: Option<&str>,
    ) -> Vec<AuthMethod> {
        let mut methods = Vec::new();

        if let Some((socket, keys)) = &self.agent {
            methods.push(AuthMethod::Agent {
                socket: socket.clone(),
                keys: keys.clone(),
            });
        }

        let mut signers = host_signers;
        signers.extend(self.signers.iter().cloned());
        if !signers.is_empty() {
            methods.push(AuthMethod::Keys { signers });
        }

        if let Some(password) = host_password.or(self.password.as_deref()) {
            methods.push(AuthMethod::Password {
                password: password.to_string(),
            });
        }

        methods
    }
}

/// Expand `~/` in identity file paths against the effective home directory.
pub fn expand_identity_files(files: &[String]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|f| PathBuf::from(shellexpand::tilde(f).as_ref()))
        .collect()
}

/// Load signers from identity files.
///
/// Unencrypted keys load as-is; encrypted keys are retried with the
/// configured passphrase. Unreadable or unparsable files are skipped with
/// a debug record so one bad path never blocks the rest.
pub fn load_signers(
    files: &[PathBuf],
    passphrase: Option<&str>,
    auth_kind: &str,
) -> Vec<Arc<KeyPair>> {
    let mut signers = Vec::new();

    for file in files {
        match load_signer(file, passphrase) {
            Ok(key) => {
                debug!(kind = auth_kind, file = %file.display(), "parsed identity file");
                signers.push(Arc::new(key));
            }
            Err(message) => {
                debug!(kind = auth_kind, file = %file.display(), %message, "skipping identity file");
            }
        }
    }

    signers
}

fn load_signer(file: &Path, passphrase: Option<&str>) -> Result<KeyPair, String> {
    if !file.exists() {
        return Err("file not found".to_string());
    }

    match load_secret_key(file, None) {
        Ok(key) => Ok(key),
        Err(russh_keys::Error::KeyIsEncrypted) => match passphrase {
            Some(pass) => load_secret_key(file, Some(pass))
                .map_err(|e| format!("parse with passphrase failed: {}", e)),
            None => Err("key is encrypted and no passphrase configured".to_string()),
        },
        Err(e) => {
            // some key formats surface an encrypted key as a generic parse
            // error; retry with the passphrase before giving up
            if let Some(pass) = passphrase {
                if let Ok(key) = load_secret_key(file, Some(pass)) {
                    return Ok(key);
                }
            }
            Err(format!("parse failed: {}", e))
        }
    }
}

/// Enumerate public keys from the agent at `SSH_AUTH_SOCK`, when present.
pub async fn agent_keys() -> Option<(PathBuf, Vec<PublicKey>)> {
    let socket = PathBuf::from(std::env::var_os("SSH_AUTH_SOCK")?);

    let stream = match UnixStream::connect(&socket).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(socket = %socket.display(), error = %e, "connect to ssh-agent failed");
            return None;
        }
    };

    let mut agent = AgentClient::connect(stream);
    match agent.request_identities().await {
        Ok(keys) if !keys.is_empty() => {
            debug!(socket = %socket.display(), count = keys.len(), "ssh-agent keys enumerated");
            Some((socket, keys))
        }
        Ok(_) => {
            debug!("ssh-agent holds no identities");
            None
        }
        Err(e) => {
            debug!(error = %e, "ssh-agent identity listing failed");
            None
        }
    }
}

/// Open a fresh agent connection for signing during authentication.
pub async fn connect_agent(socket: &Path) -> Option<AgentClient<UnixStream>> {
    match UnixStream::connect(socket).await {
        Ok(stream) => Some(AgentClient::connect(stream)),
        Err(e) => {
            debug!(socket = %socket.display(), error = %e, "agent connect for signing failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_identity_files() {
        let home = dirs::home_dir().unwrap();
        let expanded = expand_identity_files(&["~/.ssh/id_rsa".to_string()]);
        assert_eq!(expanded[0], home.join(".ssh/id_rsa"));

        let absolute = expand_identity_files(&["/etc/key".to_string()]);
        assert_eq!(absolute[0], PathBuf::from("/etc/key"));
    }

    #[test]
    fn test_load_signers_skips_missing_files() {
        let signers = load_signers(
            &[PathBuf::from("/nonexistent/id_ed25519")],
            None,
            "default",
        );
        assert!(signers.is_empty());
    }

    #[test]
    fn test_host_password_overrides_default() {
        let defaults = DefaultAuth {
            agent: None,
            signers: Vec::new(),
            password: Some("default-pw".to_string()),
        };

        let methods = defaults.methods_for_host(Vec::new(), Some("host-pw"));
        assert_eq!(methods.len(), 1);
        assert!(matches!(
            &methods[0],
            AuthMethod::Password { password } if password == "host-pw"
        ));
    }

    #[test]
    fn test_default_password_used_when_host_has_none() {
        let defaults = DefaultAuth {
            agent: None,
            signers: Vec::new(),
            password: Some("default-pw".to_string()),
        };

        let methods = defaults.methods_for_host(Vec::new(), None);
        assert_eq!(methods.len(), 1);
        assert!(matches!(
            &methods[0],
            AuthMethod::Password { password } if password == "default-pw"
        ));
    }

    #[test]
    fn test_no_material_yields_no_methods() {
        let defaults = DefaultAuth::default();
        assert!(defaults.methods_for_host(Vec::new(), None).is_empty());
    }
}
