//! Vault for encrypted secrets embedded in configuration and inventory.
//!
//! Ciphertexts are single printable lines so they can sit inside any string
//! field: a fixed header followed by a base64 payload of
//! `salt(16) || nonce(12) || AES-256-GCM ciphertext`. The key is derived
//! with PBKDF2-HMAC-SHA256 over the vault password.
//!
//! The vault password is captured at most once per task. The task facade
//! resolves it into a process-scoped cell before any worker starts, so
//! workers never race on password capture.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::{Lazy, OnceCell};
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Vault header marker
pub const VAULT_HEADER: &str = "$ROSSH-AES256$";

/// PBKDF2 iteration count
const KDF_ITERATIONS: u32 = 100_000;

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$ROSSH-AES256\$[A-Za-z0-9+/]+={0,2}$").expect("header regex"));

/// Process-wide vault password, populated once per task.
static VAULT_PASSWORD: OnceCell<String> = OnceCell::new();

/// Vault codec for encrypting/decrypting secrets.
pub struct Vault {
    password: String,
}

impl Vault {
    /// Create a new vault with the given password.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Encrypt plaintext into a single-line ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Vault(format!("cipher init failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Vault(format!("encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", VAULT_HEADER, BASE64.encode(&payload)))
    }

    /// Decrypt a ciphertext produced by [`Vault::encrypt`].
    pub fn decrypt(&self, content: &str) -> Result<String> {
        let content = content.trim();
        let payload = content
            .strip_prefix(VAULT_HEADER)
            .ok_or_else(|| Error::Vault("not a vault ciphertext".into()))?;

        let payload = BASE64
            .decode(payload)
            .map_err(|e| Error::Vault(format!("base64 decode failed: {}", e)))?;

        if payload.len() < SALT_LEN + NONCE_LEN {
            return Err(Error::Vault("ciphertext payload too short".into()));
        }

        let (salt, rest) = payload.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Vault(format!("cipher init failed: {}", e)))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Vault("decryption failed - wrong vault password?".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Vault("decrypted content is not valid UTF-8".into()))
    }

    /// Check whether a string is a vault ciphertext.
    pub fn is_encrypted(content: &str) -> bool {
        HEADER_RE.is_match(content.trim())
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
        key
    }
}

/// Resolve the vault password, caching it for the remainder of the process.
///
/// Source order: the configured `auth.vault_pass_file` (executed when it
/// carries the executable bit, read otherwise), then a terminal prompt.
/// The task facade calls this once, before workers start, whenever any
/// configured or inventoried value is a ciphertext.
pub fn password(config: &Config) -> Result<&'static str> {
    VAULT_PASSWORD
        .get_or_try_init(|| resolve_password(config))
        .map(|s| s.as_str())
}

/// Decrypt `value` when it is a ciphertext, pass it through otherwise.
pub fn reveal(value: &str, config: &Config) -> Result<String> {
    if !Vault::is_encrypted(value) {
        return Ok(value.to_string());
    }

    let pass = password(config)?;
    Vault::new(pass).decrypt(value)
}

fn resolve_password(config: &Config) -> Result<String> {
    if let Some(file) = &config.auth.vault_pass_file {
        return password_from_file(file);
    }

    prompt_password("Vault password")
}

/// Read or execute the vault password file.
///
/// Convention preserved from the original tool: when the executable bit is
/// set the file is run and its trimmed stdout is the password; otherwise
/// its trimmed contents are. A file whose contents start with a shebang but
/// that lacks the executable bit is rejected with a pointed diagnostic.
fn password_from_file(file: &Path) -> Result<String> {
    if is_executable(file)? {
        let output = std::process::Command::new(file).output().map_err(|e| {
            Error::Vault(format!(
                "problem executing vault password file '{}': {}; if this is not \
                 a script, remove the executable bit",
                file.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(Error::Vault(format!(
                "vault password file '{}' exited with {}",
                file.display(),
                output.status
            )));
        }

        let pass = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if pass.is_empty() {
            return Err(Error::Vault(format!(
                "vault password file '{}' produced no output; if this is not \
                 a script, remove the executable bit",
                file.display()
            )));
        }

        debug!(file = %file.display(), "vault password obtained by executing file");
        return Ok(pass);
    }

    let content = std::fs::read_to_string(file).map_err(|e| {
        Error::Vault(format!(
            "read vault password file '{}' failed: {}",
            file.display(),
            e
        ))
    })?;

    let pass = content.trim().to_string();
    if pass.is_empty() {
        return Err(Error::Vault(format!(
            "vault password file '{}' is empty",
            file.display()
        )));
    }

    if pass.starts_with("#!/") {
        return Err(Error::Vault(format!(
            "'{}' looks like a script; add the executable bit to run it",
            file.display()
        )));
    }

    debug!(file = %file.display(), "vault password read from file");
    Ok(pass)
}

/// Prompt for the vault password on the controlling terminal.
///
/// Empty inputs are rejected and re-prompted.
pub fn prompt_password(prompt: &str) -> Result<String> {
    loop {
        let pass = dialoguer::Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| Error::Vault(format!("terminal prompt failed: {}", e)))?;

        if !pass.is_empty() {
            return Ok(pass);
        }

        eprintln!("password can not be empty, retry");
    }
}

/// Prompt for a new vault password, entered twice.
pub fn prompt_new_password() -> Result<String> {
    let pass = dialoguer::Password::new()
        .with_prompt("New vault password")
        .with_confirmation("Confirm new vault password", "the two inputs do not match")
        .interact()
        .map_err(|e| Error::Vault(format!("terminal prompt failed: {}", e)))?;

    if pass.is_empty() {
        return Err(Error::Vault("vault password can not be empty".into()));
    }

    Ok(pass)
}

#[cfg(unix)]
fn is_executable(file: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(file)?;
    Ok(metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_file: &Path) -> Result<bool> {
    Ok(false)
}
