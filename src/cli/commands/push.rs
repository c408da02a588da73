//! `rossh push` - copy local files and dirs to target hosts.
//!
//! Each local path is compressed client-side into a staging archive before
//! the task starts; the archives are uploaded, expanded under the
//! destination directory, and always cleaned up locally on the way out.

use clap::Args;
use std::path::PathBuf;

use rossh::config::Config;
use rossh::error::Result;
use rossh::task::{Operation, Task};

/// Arguments for the push subcommand
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Target hosts: aliases, bracket patterns, or group names
    #[arg(value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Local files/dirs to copy to the hosts
    #[arg(short = 'f', long = "files", value_name = "PATH", action = clap::ArgAction::Append)]
    pub files: Vec<PathBuf>,

    /// Remote directory the trees are placed in
    #[arg(short = 'd', long = "dest-path", default_value = "/tmp")]
    pub dest_path: String,

    /// Overwrite files that already exist on the hosts
    #[arg(short = 'F', long = "force")]
    pub force: bool,

    /// List the resolved hosts without executing
    #[arg(short = 'l', long, conflicts_with = "files")]
    pub list: bool,
}

impl PushArgs {
    /// Push the files across the selected hosts.
    pub async fn execute(&self, config: Config) -> Result<()> {
        let operation = Operation::Push {
            files: self.files.clone(),
            staging_archives: Vec::new(),
            dest_dir: self.dest_path.clone(),
            overwrite: self.force,
        };
        let task = Task::new(operation, config, self.hosts.clone());

        if self.list {
            return task.list_hosts();
        }

        task.run().await
    }
}
