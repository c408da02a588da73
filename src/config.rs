//! Configuration module for rossh
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - Configuration file (TOML, default `~/.rossh.toml`)
//! - Command-line arguments (merged by the CLI layer)
//!
//! Any string field may hold a vault ciphertext; it is decrypted lazily at
//! the point of use, never here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration structure, read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Authentication settings for target hosts
    pub auth: AuthConfig,

    /// Target host settings
    pub hosts: HostsConfig,

    /// Remote run behavior
    pub run: RunConfig,

    /// Timeouts in seconds (0 = unlimited)
    pub timeout: TimeoutConfig,

    /// Jump host settings
    pub proxy: ProxyConfig,

    /// Output settings
    pub output: OutputConfig,
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Login user for target hosts
    pub user: String,

    /// Password of the login user (may be a vault ciphertext)
    pub password: Option<String>,

    /// File containing the password of the login user
    pub pass_file: Option<PathBuf>,

    /// Ask for the password on the terminal
    pub ask_pass: bool,

    /// Default identity files, tried in order
    pub identity_files: Vec<String>,

    /// Passphrase for encrypted identity files (may be a vault ciphertext)
    pub passphrase: Option<String>,

    /// File that provides the vault password (executed when executable)
    pub vault_pass_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            password: None,
            pass_file: None,
            ask_pass: false,
            identity_files: vec!["~/.ssh/id_ed25519".into(), "~/.ssh/id_rsa".into()],
            passphrase: None,
            vault_pass_file: None,
        }
    }
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

/// Target host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    /// Path to the inventory file
    pub inventory: Option<PathBuf>,

    /// Default SSH port for hosts that do not override it
    pub port: u16,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            inventory: None,
            port: 22,
        }
    }
}

/// Remote run behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run the command/script through sudo
    pub sudo: bool,

    /// User to run as when sudo is enabled
    pub as_user: String,

    /// Value exported as LANG/LC_ALL/LANGUAGE on the remote side
    pub lang: Option<String>,

    /// Number of hosts processed concurrently
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sudo: false,
            as_user: "root".to_string(),
            lang: None,
            concurrency: 1,
        }
    }
}

/// Timeouts, all in seconds; 0 disables the deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection deadline (dial + handshake + auth)
    pub conn: u64,

    /// Per-host operation deadline
    pub command: u64,

    /// Whole-task deadline
    pub task: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            conn: 10,
            command: 0,
            task: 0,
        }
    }
}

/// Jump host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Jump host address; empty disables proxying
    pub server: Option<String>,

    /// Jump host SSH port
    pub port: u16,

    /// Login user on the jump host; falls back to `auth.user`
    pub user: Option<String>,

    /// Password for the jump host (may be a vault ciphertext)
    pub password: Option<String>,

    /// Identity files for the jump host
    pub identity_files: Vec<String>,

    /// Passphrase for the jump host identity files
    pub passphrase: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: 22,
            user: None,
            password: None,
            identity_files: Vec::new(),
            passphrase: None,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Duplicate result records into this file
    pub file: Option<PathBuf>,

    /// Emit one JSON object per record instead of colored text
    pub json: bool,

    /// Verbosity (0 = warn, 1 = info, 2 = debug, 3+ = trace)
    pub verbose: u8,

    /// Suppress everything except result records
    pub quiet: bool,
}

impl Config {
    /// Load configuration from an explicit path, or from `~/.rossh.toml`
    /// when present. Missing files yield the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match dirs::home_dir().map(|h| h.join(".rossh.toml")) {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate settings that would make the task misbehave.
    ///
    /// Fatal problems are reported before any host is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.run.concurrency == 0 {
            return Err(Error::ConfigInvalid(
                "run.concurrency must be at least 1".to_string(),
            ));
        }

        if self.auth.user.is_empty() {
            return Err(Error::ConfigInvalid(
                "auth.user must not be empty".to_string(),
            ));
        }

        if let Some(pass_file) = &self.auth.pass_file {
            if !pass_file.exists() {
                return Err(Error::ConfigInvalid(format!(
                    "auth.pass_file '{}' does not exist",
                    pass_file.display()
                )));
            }
        }

        Ok(())
    }
}
