//! Host definition for the rossh inventory.
//!
//! A `Host` is one parsed inventory entry: connection coordinates plus the
//! inline variables declared on its line. Effective values (after group
//! vars and configuration defaults are merged in) are computed during
//! resolution, not here.

use indexmap::IndexMap;
use tracing::warn;

/// A host parsed from the inventory file.
#[derive(Debug, Clone, Default)]
pub struct Host {
    /// User-facing identifier, unique across a task
    pub alias: String,

    /// TCP destination; defaults to the alias
    pub address: String,

    /// SSH port override
    pub port: Option<u16>,

    /// Login user override
    pub user: Option<String>,

    /// Password override (may be a vault ciphertext)
    pub password: Option<String>,

    /// Identity file overrides, comma-separated in the source
    pub keys: Vec<String>,

    /// Passphrase for the identity files (may be a vault ciphertext)
    pub passphrase: Option<String>,

    /// Remaining variables declared on the host line
    pub vars: IndexMap<String, String>,

    /// Groups this host belongs to, in declaration order
    pub groups: Vec<String>,
}

/// Errors that can occur when parsing a host line
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostParseError {
    /// The line held no host token
    #[error("empty host line")]
    EmptyLine,

    /// The `:port` suffix did not parse as a port number
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// A trailing token was not of the form `k=v`
    #[error("malformed entry '{0}', expected k=v")]
    MalformedEntry(String),
}

impl Host {
    /// Create a host whose address equals its alias.
    pub fn new(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            address: alias.clone(),
            alias,
            ..Default::default()
        }
    }

    /// Parse a host line: `alias[:port] [k=v ...]`.
    ///
    /// Known keys are `host=`, `port=`, `user=`, `password=`, `keys=`
    /// (comma-separated paths), `passphrase=`. Unknown keys are kept as
    /// plain vars and flagged with a warning.
    pub fn parse(line: &str) -> Result<Self, HostParseError> {
        let mut parts = line.split_whitespace();
        let head = parts.next().ok_or(HostParseError::EmptyLine)?;

        let (alias, port) = match head.split_once(':') {
            Some((alias, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| HostParseError::InvalidPort(port.to_string()))?;
                (alias, Some(port))
            }
            None => (head, None),
        };

        let mut host = Host::new(alias);
        host.port = port;

        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| HostParseError::MalformedEntry(part.to_string()))?;
            host.apply_var(key, value);
        }

        Ok(host)
    }

    /// Apply one `k=v` entry to this host.
    pub fn apply_var(&mut self, key: &str, value: &str) {
        match key {
            "host" => self.address = value.to_string(),
            "port" => match value.parse::<u16>() {
                Ok(port) => self.port = Some(port),
                Err(_) => warn!(alias = %self.alias, value, "ignoring invalid port"),
            },
            "user" => self.user = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "keys" => {
                self.keys = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "passphrase" => self.passphrase = Some(value.to_string()),
            _ => {
                warn!(alias = %self.alias, key, "unknown inventory key");
                self.vars.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Record membership of a group, keeping declaration order.
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias
    }
}

impl Eq for Host {}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.alias)?;
        if self.address != self.alias {
            write!(f, " ({})", self.address)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_alias() {
        let host = Host::parse("web1").unwrap();
        assert_eq!(host.alias, "web1");
        assert_eq!(host.address, "web1");
        assert_eq!(host.port, None);
    }

    #[test]
    fn test_alias_with_port() {
        let host = Host::parse("web1:2222").unwrap();
        assert_eq!(host.alias, "web1");
        assert_eq!(host.port, Some(2222));
    }

    #[test]
    fn test_inline_vars() {
        let host =
            Host::parse("db1 host=10.0.0.5 user=admin password=pw keys=~/.ssh/a,~/.ssh/b").unwrap();
        assert_eq!(host.address, "10.0.0.5");
        assert_eq!(host.user.as_deref(), Some("admin"));
        assert_eq!(host.password.as_deref(), Some("pw"));
        assert_eq!(host.keys, vec!["~/.ssh/a", "~/.ssh/b"]);
    }

    #[test]
    fn test_port_var_overrides() {
        let host = Host::parse("db1 port=2022").unwrap();
        assert_eq!(host.port, Some(2022));
    }

    #[test]
    fn test_unknown_key_kept_as_var() {
        let host = Host::parse("h1 datacenter=east").unwrap();
        assert_eq!(host.vars.get("datacenter").map(String::as_str), Some("east"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Host::parse("   "), Err(HostParseError::EmptyLine));
        assert_eq!(
            Host::parse("h1:notaport"),
            Err(HostParseError::InvalidPort("notaport".into()))
        );
        assert_eq!(
            Host::parse("h1 standalone"),
            Err(HostParseError::MalformedEntry("standalone".into()))
        );
    }
}
