//! Command-line interface for rossh.
//!
//! Argument parsing and the merge of command-line flags over the
//! configuration file. Global flags mirror the `Config` fields; each
//! subcommand contributes its operation payload.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rossh::config::Config;
use rossh::error::Result;

/// rossh - run commands, scripts and file transfers across a fleet of
/// hosts over SSH, concurrently.
#[derive(Parser, Debug)]
#[command(name = "rossh")]
#[command(version)]
#[command(about = "Parallel SSH execution engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file (default ~/.rossh.toml)
    #[arg(long, global = true, env = "ROSSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the inventory file
    #[arg(short = 'i', long, global = true, env = "ROSSH_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Login user for target hosts
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    /// Password of the login user (may be a vault ciphertext)
    #[arg(short = 'p', long, global = true)]
    pub password: Option<String>,

    /// File containing the password of the login user
    #[arg(long, global = true)]
    pub pass_file: Option<PathBuf>,

    /// Ask for the login password on the terminal
    #[arg(short = 'k', long, global = true)]
    pub ask_pass: bool,

    /// Identity files, tried in order (repeatable)
    #[arg(short = 'I', long = "identity-file", global = true, action = clap::ArgAction::Append)]
    pub identity_files: Vec<String>,

    /// Passphrase for encrypted identity files
    #[arg(long, global = true)]
    pub passphrase: Option<String>,

    /// File that provides the vault password (executed when executable)
    #[arg(long, global = true)]
    pub vault_pass_file: Option<PathBuf>,

    /// Default SSH port for target hosts
    #[arg(short = 'P', long, global = true)]
    pub port: Option<u16>,

    /// Run the command/script through sudo
    #[arg(short = 's', long, global = true)]
    pub sudo: bool,

    /// User to run as when sudo is enabled
    #[arg(short = 'U', long, global = true)]
    pub as_user: Option<String>,

    /// Value exported as LANG/LC_ALL/LANGUAGE on the remote side
    #[arg(long, global = true)]
    pub lang: Option<String>,

    /// Number of hosts processed concurrently
    #[arg(short = 'c', long, global = true)]
    pub concurrency: Option<usize>,

    /// Connection deadline in seconds
    #[arg(long, global = true)]
    pub conn_timeout: Option<u64>,

    /// Per-host operation deadline in seconds (0 = unlimited)
    #[arg(long, global = true)]
    pub command_timeout: Option<u64>,

    /// Whole-task deadline in seconds (0 = unlimited)
    #[arg(long, global = true)]
    pub task_timeout: Option<u64>,

    /// Jump host, as [user@]host[:port]
    #[arg(short = 'X', long, global = true)]
    pub proxy_server: Option<String>,

    /// Password for the jump host (may be a vault ciphertext)
    #[arg(long, global = true)]
    pub proxy_password: Option<String>,

    /// Identity files for the jump host (repeatable)
    #[arg(long = "proxy-identity-file", global = true, action = clap::ArgAction::Append)]
    pub proxy_identity_files: Vec<String>,

    /// Passphrase for the jump host identity files
    #[arg(long, global = true)]
    pub proxy_passphrase: Option<String>,

    /// Duplicate result records into this file
    #[arg(short = 'o', long, global = true)]
    pub output_file: Option<PathBuf>,

    /// Emit one JSON object per record
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress everything except result records
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command on target hosts
    Exec(commands::exec::ExecArgs),

    /// Upload a local script and run it on target hosts
    Script(commands::script::ScriptArgs),

    /// Copy local files and dirs to target hosts
    Push(commands::push::PushArgs),

    /// Copy files and dirs from target hosts to local
    Fetch(commands::fetch::FetchArgs),

    /// Encryption and decryption utility for embedded secrets
    Vault(commands::vault::VaultArgs),

    /// Print version information
    Version,
}

impl Cli {
    /// Load the configuration file and overlay the command-line flags.
    pub fn merged_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(inventory) = &self.inventory {
            config.hosts.inventory = Some(inventory.clone());
        }
        if let Some(user) = &self.user {
            config.auth.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.auth.password = Some(password.clone());
        }
        if let Some(pass_file) = &self.pass_file {
            config.auth.pass_file = Some(pass_file.clone());
        }
        if self.ask_pass {
            config.auth.ask_pass = true;
        }
        if !self.identity_files.is_empty() {
            config.auth.identity_files = self.identity_files.clone();
        }
        if let Some(passphrase) = &self.passphrase {
            config.auth.passphrase = Some(passphrase.clone());
        }
        if let Some(vault_pass_file) = &self.vault_pass_file {
            config.auth.vault_pass_file = Some(vault_pass_file.clone());
        }
        if let Some(port) = self.port {
            config.hosts.port = port;
        }
        if self.sudo {
            config.run.sudo = true;
        }
        if let Some(as_user) = &self.as_user {
            config.run.as_user = as_user.clone();
        }
        if let Some(lang) = &self.lang {
            config.run.lang = Some(lang.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(conn) = self.conn_timeout {
            config.timeout.conn = conn;
        }
        if let Some(command) = self.command_timeout {
            config.timeout.command = command;
        }
        if let Some(task) = self.task_timeout {
            config.timeout.task = task;
        }

        if let Some(spec) = &self.proxy_server {
            match rossh::connection::JumpHost::parse_spec(spec) {
                Some((user, server, port)) => {
                    config.proxy.server = Some(server);
                    config.proxy.port = port;
                    if user.is_some() {
                        config.proxy.user = user;
                    }
                }
                None => {
                    return Err(rossh::error::Error::ConfigInvalid(format!(
                        "invalid proxy server '{}', expected [user@]host[:port]",
                        spec
                    )))
                }
            }
        }
        if let Some(proxy_password) = &self.proxy_password {
            config.proxy.password = Some(proxy_password.clone());
        }
        if !self.proxy_identity_files.is_empty() {
            config.proxy.identity_files = self.proxy_identity_files.clone();
        }
        if let Some(proxy_passphrase) = &self.proxy_passphrase {
            config.proxy.passphrase = Some(proxy_passphrase.clone());
        }

        if let Some(output_file) = &self.output_file {
            config.output.file = Some(output_file.clone());
        }
        if self.json {
            config.output.json = true;
        }
        config.output.verbose = self.verbose;
        if self.quiet {
            config.output.quiet = true;
        }

        Ok(config)
    }

    /// Dispatch the selected subcommand. Per-host failures are reported
    /// in the result stream and do not surface here; only fatal errors do.
    pub async fn execute(self) -> Result<()> {
        match &self.command {
            Commands::Exec(args) => {
                let config = self.merged_config()?;
                args.execute(config).await
            }
            Commands::Script(args) => {
                let config = self.merged_config()?;
                args.execute(config).await
            }
            Commands::Push(args) => {
                let config = self.merged_config()?;
                args.execute(config).await
            }
            Commands::Fetch(args) => {
                let config = self.merged_config()?;
                args.execute(config).await
            }
            Commands::Vault(args) => {
                let config = self.merged_config()?;
                args.execute(config)
            }
            Commands::Version => {
                println!("rossh {}", rossh::version());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_exec() {
        let cli = Cli::try_parse_from([
            "rossh", "exec", "web[1-3]", "-e", "uptime", "-c", "5", "-s",
        ])
        .unwrap();

        assert!(cli.sudo);
        assert_eq!(cli.concurrency, Some(5));
        match &cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.hosts, vec!["web[1-3]"]);
                assert_eq!(args.execute.as_deref(), Some("uptime"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_list_conflicts_with_execute() {
        let result = Cli::try_parse_from(["rossh", "exec", "h1", "-e", "id", "--list"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "rossh",
            "exec",
            "h1",
            "-e",
            "id",
            "-u",
            "ops",
            "-P",
            "2222",
            "--task-timeout",
            "30",
        ])
        .unwrap();

        let config = cli.merged_config().unwrap();
        assert_eq!(config.auth.user, "ops");
        assert_eq!(config.hosts.port, 2222);
        assert_eq!(config.timeout.task, 30);
    }

    #[test]
    fn test_proxy_spec_parsing() {
        let cli =
            Cli::try_parse_from(["rossh", "exec", "h1", "-e", "id", "-X", "ops@bastion:2200"])
                .unwrap();
        let config = cli.merged_config().unwrap();
        assert_eq!(config.proxy.server.as_deref(), Some("bastion"));
        assert_eq!(config.proxy.port, 2200);
        assert_eq!(config.proxy.user.as_deref(), Some("ops"));
    }
}
