//! `rossh vault` - encryption and decryption utility.
//!
//! Encrypt sensitive content such as passwords so it can sit in
//! configuration and inventory files instead of being visible as
//! plaintext. The vault password comes from `--vault-pass-file` when
//! configured, otherwise from a terminal prompt.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use rossh::config::Config;
use rossh::error::{Error, Result};
use rossh::vault::{self, Vault};

/// Arguments for the vault subcommand
#[derive(Args, Debug)]
pub struct VaultArgs {
    /// Vault action
    #[command(subcommand)]
    pub action: VaultAction,
}

/// Vault operations
#[derive(Subcommand, Debug)]
pub enum VaultAction {
    /// Encrypt a value and print the ciphertext
    Encrypt {
        /// The plaintext; prompted for when omitted
        plaintext: Option<String>,
    },

    /// Decrypt a ciphertext and print the plaintext
    Decrypt {
        /// The ciphertext; prompted for when omitted
        ciphertext: Option<String>,
    },

    /// Encrypt a whole file in place (or into --output)
    EncryptFile {
        /// The file to encrypt
        file: PathBuf,

        /// Write the ciphertext here instead of back into the file
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a whole file in place (or into --output)
    DecryptFile {
        /// The file to decrypt
        file: PathBuf,

        /// Write the plaintext here instead of back into the file
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a file and print it without modifying it
    View {
        /// The file to view
        file: PathBuf,
    },
}

impl VaultArgs {
    /// Execute the vault action.
    pub fn execute(&self, config: Config) -> Result<()> {
        match &self.action {
            VaultAction::Encrypt { plaintext } => {
                let plaintext = match plaintext {
                    Some(value) => value.clone(),
                    None => vault::prompt_password("Content to encrypt")?,
                };
                let vault = Vault::new(encryption_password(&config)?);
                println!("{}", vault.encrypt(&plaintext)?);
                Ok(())
            }

            VaultAction::Decrypt { ciphertext } => {
                let ciphertext = match ciphertext {
                    Some(value) => value.clone(),
                    None => vault::prompt_password("Content to decrypt")?,
                };
                let vault = Vault::new(vault::password(&config)?);
                println!("{}", vault.decrypt(&ciphertext)?);
                Ok(())
            }

            VaultAction::EncryptFile { file, output } => {
                let content = std::fs::read_to_string(file)?;
                if Vault::is_encrypted(&content) {
                    return Err(Error::Vault(format!(
                        "'{}' is already encrypted",
                        file.display()
                    )));
                }

                let vault = Vault::new(encryption_password(&config)?);
                let ciphertext = vault.encrypt(&content)?;

                let target = output.as_ref().unwrap_or(file);
                std::fs::write(target, ciphertext + "\n")?;
                eprintln!("encrypted: {}", target.display());
                Ok(())
            }

            VaultAction::DecryptFile { file, output } => {
                let plaintext = decrypt_file(file, &config)?;
                let target = output.as_ref().unwrap_or(file);
                std::fs::write(target, plaintext)?;
                eprintln!("decrypted: {}", target.display());
                Ok(())
            }

            VaultAction::View { file } => {
                let plaintext = decrypt_file(file, &config)?;
                print!("{}", plaintext);
                Ok(())
            }
        }
    }
}

fn decrypt_file(file: &PathBuf, config: &Config) -> Result<String> {
    let content = std::fs::read_to_string(file)?;
    if !Vault::is_encrypted(&content) {
        return Err(Error::Vault(format!(
            "'{}' is not vault encrypted",
            file.display()
        )));
    }

    let vault = Vault::new(vault::password(config)?);
    vault.decrypt(&content)
}

/// Password for encryption: the configured file, or a confirmed prompt.
fn encryption_password(config: &Config) -> Result<String> {
    if config.auth.vault_pass_file.is_some() {
        return vault::password(config).map(String::from);
    }
    vault::prompt_new_password()
}
