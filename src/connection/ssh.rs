//! Per-host SSH session protocol.
//!
//! One `SshConnection` per host, opened on worker pickup and closed on
//! return. The four operation kinds share session setup; only the
//! in-session behavior differs:
//!
//! - command: PTY execution with optional lang export, sudo wrapping and
//!   one-shot sudo password injection
//! - script: upload, mark executable, run under the command rules, remove
//! - push: upload a staging archive, expand it, drop the archive
//! - fetch: recursive download, optionally staged through `sudo cp` when
//!   the SSH user cannot read the files

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::auth::{self, AuthMethod};
use super::proxy::JumpHost;
use super::{escape_shell_arg, ConnectionError, ConnectionResult, ExecuteOptions, TargetHost};

/// Linux username character class used in the sudo prompt patterns.
const LINUX_USER_PATTERN: &str = "[a-zA-Z0-9_.-]+[$]?";

/// The sudo password prompt, English and Chinese locales.
///
/// The first match on the PTY stream is authoritative: the password is
/// written exactly once, and result post-processing strips only the
/// matched span.
pub static SUDO_PROMPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s).*\[sudo\] password for {u}:(\n|)|(?s).*\[sudo\] {u} 的密码：(\n|)",
        u = LINUX_USER_PATTERN
    ))
    .expect("sudo prompt regex is valid")
});

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An established, authenticated session to one target host.
pub struct SshConnection {
    alias: String,
    user: String,
    handle: Handle<ClientHandler>,
    // keeps the tunnel alive for proxied sessions
    _proxy: Option<Handle<ClientHandler>>,
}

impl SshConnection {
    /// Open a session to `host`, directly or through the jump host.
    ///
    /// The caller bounds this with the connection deadline; on expiry the
    /// future is dropped and the half-open connection with it.
    pub async fn connect(host: &TargetHost, jump: Option<&JumpHost>) -> ConnectionResult<Self> {
        let config = Arc::new(client::Config::default());

        let (mut handle, proxy_handle) = match jump {
            Some(proxy) => {
                let mut proxy_handle =
                    Self::dial(&config, &proxy.server, proxy.port).await?;
                Self::authenticate(
                    &mut proxy_handle,
                    &proxy.user,
                    &proxy.auth_methods,
                    &proxy.server,
                )
                .await?;

                debug!(proxy = %proxy, target = %host.address, "opening tunnel through jump host");
                let channel = proxy_handle
                    .channel_open_direct_tcpip(
                        host.address.clone(),
                        host.port as u32,
                        "127.0.0.1".to_string(),
                        0,
                    )
                    .await
                    .map_err(|e| {
                        ConnectionError::ConnectionFailed(format!(
                            "tunnel to {}:{} via {} failed: {}",
                            host.address, host.port, proxy, e
                        ))
                    })?;

                let handle = client::connect_stream(
                    config.clone(),
                    channel.into_stream(),
                    ClientHandler,
                )
                .await
                .map_err(|e| {
                    ConnectionError::ConnectionFailed(format!(
                        "handshake with {}:{} via {} failed: {}",
                        host.address, host.port, proxy, e
                    ))
                })?;

                (handle, Some(proxy_handle))
            }
            None => (Self::dial(&config, &host.address, host.port).await?, None),
        };

        Self::authenticate(&mut handle, &host.user, &host.auth_methods, &host.alias).await?;

        Ok(Self {
            alias: host.alias.clone(),
            user: host.user.clone(),
            handle,
            _proxy: proxy_handle,
        })
    }

    async fn dial(
        config: &Arc<client::Config>,
        address: &str,
        port: u16,
    ) -> ConnectionResult<Handle<ClientHandler>> {
        let addr = format!("{}:{}", address, port);

        let socket = TcpStream::connect(&addr).await.map_err(|e| {
            ConnectionError::ConnectionFailed(format!("dial {} failed: {}", addr, e))
        })?;

        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("set TCP_NODELAY failed: {}", e))
        })?;

        client::connect_stream(config.clone(), socket, ClientHandler)
            .await
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("handshake with {} failed: {}", addr, e))
            })
    }

    /// Try the assembled auth methods in order; first success wins.
    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        methods: &[AuthMethod],
        alias: &str,
    ) -> ConnectionResult<()> {
        for method in methods {
            match method {
                AuthMethod::Agent { socket, keys } => {
                    for key in keys {
                        let Some(agent) = auth::connect_agent(socket).await else {
                            break;
                        };
                        let (_agent, result) =
                            handle.authenticate_future(user, key.clone(), agent).await;
                        match result {
                            Ok(true) => {
                                debug!(host = alias, "authenticated via ssh-agent");
                                return Ok(());
                            }
                            Ok(false) => {}
                            Err(e) => {
                                debug!(host = alias, error = %e, "agent key rejected");
                            }
                        }
                    }
                }
                AuthMethod::Keys { signers } => {
                    for signer in signers {
                        match handle.authenticate_publickey(user, signer.clone()).await {
                            Ok(true) => {
                                debug!(host = alias, "authenticated via identity file");
                                return Ok(());
                            }
                            Ok(false) => {}
                            Err(e) => {
                                debug!(host = alias, error = %e, "public key auth errored");
                            }
                        }
                    }
                }
                AuthMethod::Password { password } => {
                    match handle.authenticate_password(user, password).await {
                        Ok(true) => {
                            debug!(host = alias, "authenticated via password");
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(e) => {
                            debug!(host = alias, error = %e, "password auth errored");
                        }
                    }
                }
            }
        }

        Err(ConnectionError::AuthenticationFailed(format!(
            "all authentication methods failed for {}@{}",
            user, alias
        )))
    }

    /// Build the remote command line: lang exports, then the command,
    /// optionally wrapped for sudo.
    fn build_command(command: &str, options: &ExecuteOptions) -> String {
        let mut cmd = String::new();

        if let Some(lang) = &options.lang {
            cmd.push_str(&format!(
                "export LANG={l};export LC_ALL={l};export LANGUAGE={l};",
                l = lang
            ));
        }

        if options.sudo {
            cmd.push_str(&format!(
                "sudo -H -u {} bash -c {}",
                options.as_user,
                escape_shell_arg(command)
            ));
        } else {
            cmd.push_str(command);
        }

        cmd
    }

    /// Run a command on a PTY, injecting the sudo password when prompted.
    ///
    /// Returns the raw captured output; the caller normalizes CRLF and
    /// strips the echoed prompt span.
    pub async fn execute_command(
        &self,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<String> {
        let full_command = Self::build_command(command, options);
        trace!(host = %self.alias, command = %full_command, "executing remote command");

        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            ConnectionError::RemoteExecError(format!("open channel failed: {}", e))
        })?;

        channel
            .request_pty(true, "xterm", 211, 40, 0, 0, &[])
            .await
            .map_err(|e| {
                ConnectionError::RemoteExecError(format!("request pty failed: {}", e))
            })?;

        channel.exec(true, full_command).await.map_err(|e| {
            ConnectionError::RemoteExecError(format!("exec failed: {}", e))
        })?;

        let mut output = Vec::new();
        let mut exit_status = None;
        let mut password_sent = false;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    output.extend_from_slice(data);

                    if options.sudo && !password_sent {
                        let seen = String::from_utf8_lossy(&output);
                        if SUDO_PROMPT_RE.is_match(&seen) {
                            let password =
                                options.login_password.clone().unwrap_or_default();
                            let payload = format!("{}\n", password);
                            channel.data(payload.as_bytes()).await.map_err(|e| {
                                ConnectionError::RemoteExecError(format!(
                                    "write sudo password failed: {}",
                                    e
                                ))
                            })?;
                            password_sent = true;
                        }
                    }
                }
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        output.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let _ = channel.eof().await;

        let output = String::from_utf8_lossy(&output).to_string();
        let code = exit_status.unwrap_or(u32::MAX);
        trace!(host = %self.alias, code, "remote command finished");

        if code == 0 {
            Ok(output)
        } else if output.trim().is_empty() {
            Err(ConnectionError::RemoteExecError(format!(
                "command exited with status {}",
                code
            )))
        } else {
            Err(ConnectionError::RemoteExecError(output))
        }
    }

    /// Upload a script, run it, and optionally remove it on the way out.
    pub async fn run_script(
        &self,
        local_path: &Path,
        dest_dir: &str,
        options: &ExecuteOptions,
        remove_after: bool,
        overwrite: bool,
    ) -> ConnectionResult<String> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ConnectionError::TransferError(format!(
                    "script path '{}' has no file name",
                    local_path.display()
                ))
            })?;
        let remote_path = join_remote(dest_dir, name);

        let sftp = self.open_sftp().await?;
        Self::create_remote_dirs(&sftp, dest_dir).await?;

        if !overwrite && remote_exists(&sftp, &remote_path).await {
            return Err(ConnectionError::TransferError(format!(
                "'{}' already exists on the host",
                remote_path
            )));
        }

        let content = tokio::fs::read(local_path).await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "read local script '{}' failed: {}",
                local_path.display(),
                e
            ))
        })?;

        self.upload_content(&sftp, &content, &remote_path, Some(0o755))
            .await?;
        drop(sftp);

        let result = self.execute_command(&remote_path, options).await;

        if remove_after {
            match self.open_sftp().await {
                Ok(sftp) => {
                    if let Err(e) = sftp.remove_file(&remote_path).await {
                        warn!(host = %self.alias, path = %remote_path, error = %e,
                              "script removal failed");
                    }
                }
                Err(e) => {
                    warn!(host = %self.alias, error = %e, "script removal failed");
                }
            }
        }

        result
    }

    /// Place staging archives under `dest_dir`, expand them, and remove
    /// the archives. `files` and `archives` pair up index by index.
    pub async fn push_archives(
        &self,
        files: &[PathBuf],
        archives: &[PathBuf],
        dest_dir: &str,
        overwrite: bool,
    ) -> ConnectionResult<String> {
        let sftp = self.open_sftp().await?;
        Self::create_remote_dirs(&sftp, dest_dir).await?;

        for (file, archive) in files.iter().zip(archives.iter()) {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ConnectionError::TransferError(format!(
                        "push path '{}' has no file name",
                        file.display()
                    ))
                })?;

            let target = join_remote(dest_dir, name);
            if !overwrite && remote_exists(&sftp, &target).await {
                return Err(ConnectionError::TransferError(format!(
                    "'{}' already exists on the host",
                    target
                )));
            }

            let archive_name = archive
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ConnectionError::TransferError(format!(
                        "archive path '{}' has no file name",
                        archive.display()
                    ))
                })?;
            let remote_archive = join_remote(dest_dir, archive_name);

            let content = tokio::fs::read(archive).await.map_err(|e| {
                ConnectionError::TransferError(format!(
                    "read staging archive '{}' failed: {}",
                    archive.display(),
                    e
                ))
            })?;
            self.upload_content(&sftp, &content, &remote_archive, None)
                .await?;

            let expand = format!(
                "cd {} && tar -xzf {} && rm -f {}",
                escape_shell_arg(dest_dir),
                escape_shell_arg(archive_name),
                escape_shell_arg(archive_name)
            );
            self.execute_command(&expand, &ExecuteOptions::default())
                .await
                .map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "expand '{}' on the host failed: {}",
                        archive_name, e
                    ))
                })?;

            debug!(host = %self.alias, file = %file.display(), dest = dest_dir, "pushed");
        }

        let names: Vec<String> = files
            .iter()
            .map(|f| f.display().to_string())
            .collect();
        Ok(format!("'{}' copied to '{}'", names.join(", "), dest_dir))
    }

    /// Recursively fetch remote paths into `<tmp_dir>/<task_id>/<alias>/`,
    /// then relocate the finished trees under `<dest_dir>/<alias>/`.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_files(
        &self,
        files: &[String],
        dest_dir: &Path,
        tmp_dir: &Path,
        task_id: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<String> {
        // with sudo, stage through a directory the login user can read
        let (sources, remote_stage) = if options.sudo {
            let stage = format!("/tmp/.rossh-fetch-{}", task_id);
            let mut steps = vec![format!("mkdir -p {}", escape_shell_arg(&stage))];
            for file in files {
                steps.push(format!(
                    "cp -r {} {}",
                    escape_shell_arg(file),
                    escape_shell_arg(&stage)
                ));
            }
            steps.push(format!("chown -R {} {}", self.user, escape_shell_arg(&stage)));
            let stage_cmd = steps.join(" && ");
            self.execute_command(&stage_cmd, options).await.map_err(|e| {
                ConnectionError::TransferError(format!("remote sudo staging failed: {}", e))
            })?;

            let staged: Vec<String> = files
                .iter()
                .map(|f| join_remote(&stage, basename(f)))
                .collect();
            (staged, Some(stage))
        } else {
            (files.to_vec(), None)
        };

        let local_stage = tmp_dir.join(task_id).join(&self.alias);
        let result = self
            .fetch_into(&sources, &local_stage, dest_dir)
            .await;

        // remove the remote staging area regardless of outcome
        if let Some(stage) = remote_stage {
            let cleanup = format!("rm -rf {}", escape_shell_arg(&stage));
            if let Err(e) = self.execute_command(&cleanup, options).await {
                warn!(host = %self.alias, error = %e, "remote staging cleanup failed");
            }
        }

        // partial local trees are removed on error
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&local_stage).await;
        }

        match result {
            Ok(()) => Ok(format!(
                "'{}' fetched to '{}'",
                files.join(", "),
                dest_dir.join(&self.alias).display()
            )),
            Err(e) => Err(e),
        }
    }

    async fn fetch_into(
        &self,
        sources: &[String],
        local_stage: &Path,
        dest_dir: &Path,
    ) -> ConnectionResult<()> {
        let sftp = self.open_sftp().await?;

        tokio::fs::create_dir_all(local_stage).await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "create staging dir '{}' failed: {}",
                local_stage.display(),
                e
            ))
        })?;

        for source in sources {
            let target = local_stage.join(basename(source));
            self.download_tree(&sftp, source, &target).await?;
        }

        let final_dir = dest_dir.join(&self.alias);
        tokio::fs::create_dir_all(&final_dir).await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "create dest dir '{}' failed: {}",
                final_dir.display(),
                e
            ))
        })?;

        let mut entries = tokio::fs::read_dir(local_stage).await.map_err(|e| {
            ConnectionError::TransferError(format!("list staging dir failed: {}", e))
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConnectionError::TransferError(e.to_string()))?
        {
            let to = final_dir.join(entry.file_name());
            if to.exists() {
                let _ = tokio::fs::remove_dir_all(&to).await;
                let _ = tokio::fs::remove_file(&to).await;
            }
            tokio::fs::rename(entry.path(), &to).await.map_err(|e| {
                ConnectionError::TransferError(format!(
                    "move '{}' into place failed: {}",
                    entry.path().display(),
                    e
                ))
            })?;
        }

        let _ = tokio::fs::remove_dir_all(local_stage).await;

        Ok(())
    }

    /// Download one remote path (file or directory) to `local`, walking
    /// directories with an explicit stack.
    async fn download_tree(
        &self,
        sftp: &SftpSession,
        remote: &str,
        local: &Path,
    ) -> ConnectionResult<()> {
        let mut stack: Vec<(String, PathBuf)> = vec![(remote.to_string(), local.to_path_buf())];

        while let Some((remote_path, local_path)) = stack.pop() {
            let attrs = sftp.metadata(&remote_path).await.map_err(|e| {
                ConnectionError::TransferError(format!("stat '{}' failed: {}", remote_path, e))
            })?;

            if attrs.is_dir() {
                tokio::fs::create_dir_all(&local_path).await.map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "create '{}' failed: {}",
                        local_path.display(),
                        e
                    ))
                })?;

                let entries = sftp.read_dir(&remote_path).await.map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "list '{}' failed: {}",
                        remote_path, e
                    ))
                })?;

                for entry in entries {
                    let name = entry.file_name();
                    stack.push((join_remote(&remote_path, &name), local_path.join(&name)));
                }
            } else {
                let mut remote_file = sftp.open(&remote_path).await.map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "open '{}' failed: {}",
                        remote_path, e
                    ))
                })?;

                let mut content = Vec::new();
                remote_file.read_to_end(&mut content).await.map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "read '{}' failed: {}",
                        remote_path, e
                    ))
                })?;

                if let Some(parent) = local_path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        ConnectionError::TransferError(e.to_string())
                    })?;
                }
                tokio::fs::write(&local_path, &content).await.map_err(|e| {
                    ConnectionError::TransferError(format!(
                        "write '{}' failed: {}",
                        local_path.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }

    async fn open_sftp(&self) -> ConnectionResult<SftpSession> {
        let channel = self.handle.channel_open_session().await.map_err(|e| {
            ConnectionError::TransferError(format!("open channel failed: {}", e))
        })?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            ConnectionError::TransferError(format!("request sftp subsystem failed: {}", e))
        })?;

        SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ConnectionError::TransferError(format!("create sftp session failed: {}", e))
        })
    }

    async fn upload_content(
        &self,
        sftp: &SftpSession,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        let mut remote_file = sftp.create(remote_path).await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "create remote file '{}' failed: {}",
                remote_path, e
            ))
        })?;

        remote_file.write_all(content).await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "write remote file '{}' failed: {}",
                remote_path, e
            ))
        })?;
        remote_file.shutdown().await.map_err(|e| {
            ConnectionError::TransferError(format!(
                "flush remote file '{}' failed: {}",
                remote_path, e
            ))
        })?;
        drop(remote_file);

        if let Some(mode) = mode {
            let mut attrs = russh_sftp::protocol::FileAttributes::default();
            attrs.permissions = Some(mode);
            sftp.set_metadata(remote_path, attrs).await.map_err(|e| {
                ConnectionError::TransferError(format!(
                    "set permissions on '{}' failed: {}",
                    remote_path, e
                ))
            })?;
        }

        Ok(())
    }

    /// Create remote directories recursively, ignoring already-exists.
    async fn create_remote_dirs(sftp: &SftpSession, path: &str) -> ConnectionResult<()> {
        let mut current = String::new();

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if path.starts_with('/') || !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            let _ = sftp.create_dir(&current).await;
        }

        Ok(())
    }

    /// Release the session.
    pub async fn close(self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "task finished", "en")
            .await;
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

async fn remote_exists(sftp: &SftpSession, path: &str) -> bool {
    sftp.try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_plain() {
        let options = ExecuteOptions::default();
        assert_eq!(
            SshConnection::build_command("echo hi", &options),
            "echo hi"
        );
    }

    #[test]
    fn test_build_command_with_lang() {
        let options = ExecuteOptions {
            lang: Some("en_US.UTF-8".to_string()),
            ..Default::default()
        };
        assert_eq!(
            SshConnection::build_command("uptime", &options),
            "export LANG=en_US.UTF-8;export LC_ALL=en_US.UTF-8;export LANGUAGE=en_US.UTF-8;uptime"
        );
    }

    #[test]
    fn test_build_command_with_sudo() {
        let options = ExecuteOptions {
            sudo: true,
            as_user: "deploy".to_string(),
            ..Default::default()
        };
        assert_eq!(
            SshConnection::build_command("id -un", &options),
            "sudo -H -u deploy bash -c 'id -un'"
        );
    }

    #[test]
    fn test_build_command_escapes_quotes() {
        let options = ExecuteOptions {
            sudo: true,
            ..Default::default()
        };
        assert_eq!(
            SshConnection::build_command("echo 'x'", &options),
            "sudo -H -u root bash -c 'echo '\\''x'\\'''"
        );
    }

    #[test]
    fn test_sudo_prompt_matches_english() {
        assert!(SUDO_PROMPT_RE.is_match("[sudo] password for alice:"));
        assert!(SUDO_PROMPT_RE.is_match("noise\n[sudo] password for bob.builder:\n"));
        assert!(SUDO_PROMPT_RE.is_match("[sudo] password for svc$:"));
    }

    #[test]
    fn test_sudo_prompt_matches_chinese() {
        assert!(SUDO_PROMPT_RE.is_match("[sudo] alice 的密码："));
    }

    #[test]
    fn test_sudo_prompt_rejects_plain_output() {
        assert!(!SUDO_PROMPT_RE.is_match("password:"));
        assert!(!SUDO_PROMPT_RE.is_match("hello world"));
    }

    #[test]
    fn test_sudo_prompt_strip_keeps_following_output() {
        let raw = "[sudo] password for alice:\nroot\n";
        let stripped = SUDO_PROMPT_RE.replace_all(raw, "");
        assert_eq!(stripped.trim(), "root");
    }

    #[test]
    fn test_join_remote_and_basename() {
        assert_eq!(join_remote("/tmp", "f"), "/tmp/f");
        assert_eq!(join_remote("/tmp/", "f"), "/tmp/f");
        assert_eq!(basename("/var/log/app/"), "app");
        assert_eq!(basename("plain"), "plain");
    }
}
