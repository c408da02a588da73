//! Task facade: one invocation of the engine over one operation and one
//! resolved host list.
//!
//! The facade resolves hosts, captures passwords (vault included) before
//! any worker starts, stages push archives, dispatches the batch, and
//! consumes the result stream — racing it against the whole-task deadline
//! and SIGINT — before emitting the summary record.

use async_trait::async_trait;
use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{
    auth::DefaultAuth, ConnectionError, ConnectionResult, ExecuteOptions, JumpHost, SshConnection,
    TargetHost,
};
use crate::error::{Error, Result};
use crate::executor::{BatchExecutor, HostOperation, HostResult, HostStatus, TaskSummary};
use crate::inventory::{self, Inventory};
use crate::output::Reporter;
use crate::vault;

/// The operation a task runs on every host.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Run a command
    Command {
        /// The command, passed to the remote shell literally
        cmd: String,
    },

    /// Upload a local script and run it
    Script {
        /// Local script path
        local_path: PathBuf,
        /// Remote directory the script is placed in
        dest_dir: String,
        /// Unlink the script after execution
        remove_after: bool,
        /// Replace an existing file of the same name
        overwrite: bool,
    },

    /// Copy local files and directories to the hosts
    Push {
        /// Local paths to copy
        files: Vec<PathBuf>,
        /// Client-side staging archives, filled by the facade
        staging_archives: Vec<PathBuf>,
        /// Remote directory the trees are placed in
        dest_dir: String,
        /// Replace existing files of the same name
        overwrite: bool,
    },

    /// Copy remote files and directories to the client
    Fetch {
        /// Remote paths to copy
        files: Vec<String>,
        /// Local directory receiving one subdirectory per host
        dest_dir: PathBuf,
        /// Local staging directory
        tmp_dir: PathBuf,
    },
}

/// One engine invocation.
pub struct Task {
    id: String,
    config: Config,
    operation: Operation,
    target_args: Vec<String>,
}

impl Task {
    /// Create a task over `operation`, targeting the hosts selected by
    /// `target_args` (aliases, patterns, or group names).
    pub fn new(operation: Operation, config: Config, target_args: Vec<String>) -> Self {
        Self {
            id: Local::now().format("%Y%m%d%H%M%S").to_string(),
            config,
            operation,
            target_args,
        }
    }

    /// Stable identifier of this invocation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolve and print the target host list without executing.
    pub fn list_hosts(&self) -> Result<()> {
        let hosts = self.resolve_hosts()?;

        for host in &hosts {
            println!("{}", host.alias);
        }
        eprintln!("\nhosts ({})", hosts.len());

        Ok(())
    }

    /// Run the task to completion and emit the summary.
    pub async fn run(mut self) -> Result<()> {
        self.config.validate()?;
        self.preflight()?;

        let started = Instant::now();

        // all password capture happens here, before any worker starts
        let default_password = self.default_password()?;
        let passphrase = self.reveal_optional(self.config.auth.passphrase.clone())?;

        let defaults = DefaultAuth::assemble(
            &self.config.auth.identity_files,
            passphrase.as_deref(),
            default_password,
        )
        .await;

        let jump = self.assemble_jump(&defaults).await?;

        let resolved = self.resolve_hosts()?;
        if resolved.is_empty() {
            return Err(Error::NoHostsResolved);
        }
        debug!(task_id = %self.id, count = resolved.len(), "target hosts resolved");

        let mut targets = Vec::new();
        let mut early_failures = Vec::new();
        for host in resolved {
            match self.build_target(host, &defaults) {
                Ok(target) => targets.push(target),
                Err(failure) => early_failures.push(failure),
            }
        }

        // push staging archives live until the end of the task
        let _staging = self.stage_push_archives()?;

        let executor = BatchExecutor::new(
            self.config.run.concurrency,
            nonzero_secs(self.config.timeout.conn),
            nonzero_secs(self.config.timeout.command),
            jump,
        );

        let runner = Arc::new(OperationRunner {
            operation: self.operation.clone(),
            task_id: self.id.clone(),
            sudo: self.config.run.sudo,
            as_user: self.config.run.as_user.clone(),
            lang: self.config.run.lang.clone(),
        });

        let mut rx = executor.dispatch(targets, runner);

        let mut reporter = Reporter::new(&self.config.output)?;
        let mut success_count = 0usize;
        let mut failure_count = 0usize;

        let mut record = |result: HostResult, reporter: &mut Reporter| {
            let cleaned = clean_message(&result.message);
            let result = HostResult {
                message: cleaned,
                ..result
            };
            match result.status {
                HostStatus::Success => success_count += 1,
                HostStatus::Failed => failure_count += 1,
            }
            reporter.host_result(&self.id, &result);
        };

        for failure in early_failures {
            record(failure, &mut reporter);
        }

        let task_timeout = self.config.timeout.task;
        let deadline = tokio::time::sleep(Duration::from_secs(task_timeout.max(1)));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(result) => record(result, &mut reporter),
                    None => break,
                },
                _ = &mut deadline, if task_timeout > 0 => {
                    warn!(task_id = %self.id, timeout = task_timeout, "task timeout, closing result stream");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!(task_id = %self.id, "interrupted, closing result stream");
                    break;
                }
            }
        }
        drop(rx);

        let elapsed = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        reporter.summary(&TaskSummary {
            task_id: self.id.clone(),
            success_count,
            failure_count,
            elapsed,
        });

        Ok(())
    }

    /// Validate the operation payload before contacting any host.
    fn preflight(&self) -> Result<()> {
        match &self.operation {
            Operation::Command { cmd } => {
                if cmd.is_empty() {
                    return Err(Error::ConfigInvalid(
                        "need a command: flag '-e/--execute'".to_string(),
                    ));
                }
            }
            Operation::Script { local_path, .. } => {
                if local_path.as_os_str().is_empty() {
                    return Err(Error::ConfigInvalid(
                        "need a script: flag '-e/--execute'".to_string(),
                    ));
                }
                if !local_path.is_file() {
                    return Err(Error::ConfigInvalid(format!(
                        "script '{}' does not exist",
                        local_path.display()
                    )));
                }
            }
            Operation::Push { files, .. } => {
                if files.is_empty() {
                    return Err(Error::ConfigInvalid(
                        "need files: flag '-f/--files'".to_string(),
                    ));
                }
                for file in files {
                    if !file.exists() {
                        return Err(Error::ConfigInvalid(format!(
                            "push path '{}' does not exist",
                            file.display()
                        )));
                    }
                }
            }
            Operation::Fetch {
                files, dest_dir, ..
            } => {
                if files.is_empty() {
                    return Err(Error::ConfigInvalid(
                        "need files: flag '-f/--files'".to_string(),
                    ));
                }
                std::fs::create_dir_all(dest_dir)?;
            }
        }

        Ok(())
    }

    /// Capture the default login password: password file, then the
    /// configured value, then an interactive prompt when asked for — or
    /// when sudo needs one and none was supplied.
    fn default_password(&self) -> Result<Option<String>> {
        let mut password = None;

        if let Some(file) = &self.config.auth.pass_file {
            let content = std::fs::read_to_string(file).map_err(|e| {
                Error::ConfigInvalid(format!(
                    "read password file '{}' failed: {}",
                    file.display(),
                    e
                ))
            })?;
            password = Some(content.trim().to_string());
            debug!(file = %file.display(), "default password read from file");
        }

        if let Some(configured) = &self.config.auth.password {
            password = Some(configured.clone());
        }

        let mut password = match password {
            Some(value) => Some(self.reveal_fatal(&value)?),
            None => None,
        };

        if self.config.auth.ask_pass {
            password = Some(prompt_login_password(&self.config.auth.user)?);
        }

        if password.is_none() && self.config.run.sudo {
            debug!(
                user = %self.config.auth.user,
                "sudo requested without a password, prompting once"
            );
            password = Some(prompt_login_password(&self.config.auth.user)?);
        }

        Ok(password)
    }

    async fn assemble_jump(&self, defaults: &DefaultAuth) -> Result<Option<JumpHost>> {
        let Some(server) = self.config.proxy.server.clone() else {
            return Ok(None);
        };

        let password = self.reveal_optional(self.config.proxy.password.clone())?;
        let passphrase = self.reveal_optional(self.config.proxy.passphrase.clone())?;
        let user = self
            .config
            .proxy
            .user
            .clone()
            .unwrap_or_else(|| self.config.auth.user.clone());

        Ok(Some(
            JumpHost::assemble(
                server,
                self.config.proxy.port,
                user,
                &self.config.proxy.identity_files,
                passphrase.as_deref(),
                password,
                defaults,
            )
            .await,
        ))
    }

    /// Resolve target hosts from the inventory or from bare arguments.
    fn resolve_hosts(&self) -> Result<Vec<inventory::Host>> {
        match &self.config.hosts.inventory {
            Some(path) => {
                let inventory = Inventory::load(path)?;
                let hosts = inventory.select(&self.target_args)?;
                if hosts.is_empty() {
                    return Err(Error::NoHostsResolved);
                }
                Ok(hosts)
            }
            None => {
                let mut hosts = Vec::new();
                let mut seen = std::collections::HashSet::new();
                for arg in &self.target_args {
                    let arg = arg.trim();
                    if arg.is_empty() {
                        continue;
                    }
                    let names = inventory::expand(arg)
                        .map_err(|e| Error::InvalidHostPattern(e.to_string()))?;
                    for name in names {
                        if seen.insert(name.clone()) {
                            hosts.push(inventory::Host::new(name));
                        }
                    }
                }
                if hosts.is_empty() {
                    return Err(Error::NoHostsResolved);
                }
                Ok(hosts)
            }
        }
    }

    /// Build the executor-facing host from a resolved inventory entry.
    ///
    /// A vault decrypt failure here fails this host only; the error record
    /// enters the result stream and the task continues.
    fn build_target(
        &self,
        host: inventory::Host,
        defaults: &DefaultAuth,
    ) -> std::result::Result<TargetHost, HostResult> {
        let alias = host.alias.clone();
        let fail = |e: Error| {
            HostResult::failed(
                alias.clone(),
                ConnectionError::VaultDecryptError(e.to_string()).to_string(),
            )
        };

        let host_password = match &host.password {
            Some(value) => Some(vault::reveal(value, &self.config).map_err(&fail)?),
            None => None,
        };
        let host_passphrase = match &host.passphrase {
            Some(value) => Some(vault::reveal(value, &self.config).map_err(&fail)?),
            None => None,
        };

        let host_signers = crate::connection::auth::load_signers(
            &crate::connection::auth::expand_identity_files(&host.keys),
            host_passphrase.as_deref(),
            "individual",
        );

        let auth_methods = defaults.methods_for_host(host_signers, host_password.as_deref());

        let effective_password = host_password.or_else(|| defaults.password.clone());

        Ok(TargetHost {
            alias,
            address: host.address,
            port: host.port.unwrap_or(self.config.hosts.port),
            user: host.user.unwrap_or_else(|| self.config.auth.user.clone()),
            password: effective_password,
            auth_methods,
        })
    }

    /// Create the client-side staging archives for a push operation and
    /// record them in the operation. The returned guard deletes them on
    /// every exit path.
    fn stage_push_archives(&mut self) -> Result<StagingArchives> {
        let Operation::Push {
            files,
            staging_archives,
            ..
        } = &mut self.operation
        else {
            return Ok(StagingArchives::default());
        };

        let workdir = std::env::current_dir()?;
        let mut archives = Vec::new();

        for file in files.iter() {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::Staging(format!("push path '{}' has no file name", file.display()))
                })?;
            let micros = Local::now().timestamp_micros();
            let archive = workdir.join(format!(".{}.{}", name, micros));

            build_archive(file, &archive).map_err(|e| {
                Error::Staging(format!(
                    "archive '{}' for '{}': {}",
                    archive.display(),
                    file.display(),
                    e
                ))
            })?;

            debug!(file = %file.display(), archive = %archive.display(), "staged push archive");
            archives.push(archive);
        }

        *staging_archives = archives.clone();
        Ok(StagingArchives(archives))
    }

    fn reveal_optional(&self, value: Option<String>) -> Result<Option<String>> {
        match value {
            Some(value) => Ok(Some(self.reveal_fatal(&value)?)),
            None => Ok(None),
        }
    }

    fn reveal_fatal(&self, value: &str) -> Result<String> {
        vault::reveal(value, &self.config)
    }
}

/// Deletes push staging archives when the task ends, however it ends.
#[derive(Default)]
struct StagingArchives(Vec<PathBuf>);

impl Drop for StagingArchives {
    fn drop(&mut self) {
        for archive in &self.0 {
            if let Err(e) = std::fs::remove_file(archive) {
                warn!(archive = %archive.display(), error = %e, "staging archive cleanup failed");
            }
        }
    }
}

/// Runs the task's operation against one established session.
struct OperationRunner {
    operation: Operation,
    task_id: String,
    sudo: bool,
    as_user: String,
    lang: Option<String>,
}

impl OperationRunner {
    fn options(&self, host: &TargetHost) -> ExecuteOptions {
        ExecuteOptions {
            sudo: self.sudo,
            as_user: self.as_user.clone(),
            lang: self.lang.clone(),
            login_password: host.password.clone(),
        }
    }
}

#[async_trait]
impl HostOperation for OperationRunner {
    async fn run(&self, conn: &SshConnection, host: &TargetHost) -> ConnectionResult<String> {
        let options = self.options(host);

        match &self.operation {
            Operation::Command { cmd } => conn.execute_command(cmd, &options).await,
            Operation::Script {
                local_path,
                dest_dir,
                remove_after,
                overwrite,
            } => {
                conn.run_script(local_path, dest_dir, &options, *remove_after, *overwrite)
                    .await
            }
            Operation::Push {
                files,
                staging_archives,
                dest_dir,
                overwrite,
            } => {
                conn.push_archives(files, staging_archives, dest_dir, *overwrite)
                    .await
            }
            Operation::Fetch {
                files,
                dest_dir,
                tmp_dir,
            } => {
                conn.fetch_files(files, dest_dir, tmp_dir, &self.task_id, &options)
                    .await
            }
        }
    }
}

/// Normalize CRLF to LF, strip the sudo prompt span, and trim.
fn clean_message(message: &str) -> String {
    let unified = message.replace("\r\n", "\n");
    let stripped = crate::connection::ssh::SUDO_PROMPT_RE.replace_all(&unified, "");
    stripped.trim().to_string()
}

/// Build one gzip-compressed tar archive for a push source.
fn build_archive(source: &Path, archive: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let name = source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| source.to_path_buf());

    if source.is_dir() {
        builder.append_dir_all(&name, source)?;
    } else {
        builder.append_path_with_name(source, &name)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn prompt_login_password(user: &str) -> Result<String> {
    dialoguer::Password::new()
        .with_prompt(format!("Password for {}", user))
        .allow_empty_password(true)
        .interact()
        .map_err(|e| Error::ConfigInvalid(format!("terminal prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_normalizes_crlf() {
        assert_eq!(clean_message("a\r\nb\r\n"), "a\nb");
    }

    #[test]
    fn test_clean_message_strips_sudo_prompt() {
        let raw = "[sudo] password for alice:\r\nroot\r\n";
        assert_eq!(clean_message(raw), "root");
    }

    #[test]
    fn test_clean_message_plain_output_untouched() {
        assert_eq!(clean_message("hi"), "hi");
    }

    #[test]
    fn test_build_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("tree");
        std::fs::create_dir_all(src_dir.join("sub")).unwrap();
        std::fs::write(src_dir.join("a.txt"), "alpha").unwrap();
        std::fs::write(src_dir.join("sub/b.txt"), "beta").unwrap();

        let archive = dir.path().join(".tree.123");
        build_archive(&src_dir, &archive).unwrap();
        assert!(archive.is_file());

        let reader = std::fs::File::open(&archive).unwrap();
        let decoder = flate2::read::GzDecoder::new(reader);
        let mut tar = tar::Archive::new(decoder);
        let out = dir.path().join("out");
        tar.unpack(&out).unwrap();

        assert_eq!(std::fs::read_to_string(out.join("tree/a.txt")).unwrap(), "alpha");
        assert_eq!(
            std::fs::read_to_string(out.join("tree/sub/b.txt")).unwrap(),
            "beta"
        );
    }

    #[test]
    fn test_staging_guard_removes_archives() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join(".f.1");
        std::fs::write(&archive, "x").unwrap();

        drop(StagingArchives(vec![archive.clone()]));
        assert!(!archive.exists());
    }

    #[test]
    fn test_resolve_hosts_without_inventory_expands_patterns() {
        let task = Task::new(
            Operation::Command {
                cmd: "uptime".into(),
            },
            Config::default(),
            vec!["web[1-2]".into(), "web1".into()],
        );

        let hosts = task.resolve_hosts().unwrap();
        let aliases: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(aliases, vec!["web1", "web2"]);
    }

    #[test]
    fn test_resolve_hosts_requires_targets() {
        let task = Task::new(
            Operation::Command { cmd: "id".into() },
            Config::default(),
            Vec::new(),
        );
        assert!(matches!(
            task.resolve_hosts(),
            Err(Error::NoHostsResolved)
        ));
    }

    #[test]
    fn test_preflight_rejects_empty_command() {
        let task = Task::new(
            Operation::Command { cmd: String::new() },
            Config::default(),
            vec!["h1".into()],
        );
        assert!(task.preflight().is_err());
    }

    #[test]
    fn test_task_id_format() {
        let task = Task::new(
            Operation::Command { cmd: "id".into() },
            Config::default(),
            vec!["h1".into()],
        );
        assert_eq!(task.id().len(), 14);
        assert!(task.id().chars().all(|c| c.is_ascii_digit()));
    }
}
