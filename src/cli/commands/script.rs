//! `rossh script` - upload a local script and run it on target hosts.

use clap::Args;
use std::path::PathBuf;

use rossh::config::Config;
use rossh::error::Result;
use rossh::task::{Operation, Task};

/// Arguments for the script subcommand
#[derive(Args, Debug)]
pub struct ScriptArgs {
    /// Target hosts: aliases, bracket patterns, or group names
    #[arg(value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Local script to upload and run
    #[arg(short = 'e', long = "execute", value_name = "FILE")]
    pub execute: Option<PathBuf>,

    /// Remote directory the script is placed in
    #[arg(short = 'd', long = "dest-path", default_value = "/tmp")]
    pub dest_path: String,

    /// Remove the script from the host after execution
    #[arg(short = 'r', long)]
    pub remove: bool,

    /// Overwrite an existing file of the same name
    #[arg(short = 'F', long = "force")]
    pub force: bool,

    /// List the resolved hosts without executing
    #[arg(short = 'l', long, conflicts_with = "execute")]
    pub list: bool,
}

impl ScriptArgs {
    /// Upload and run the script across the selected hosts.
    pub async fn execute(&self, config: Config) -> Result<()> {
        let operation = Operation::Script {
            local_path: self.execute.clone().unwrap_or_default(),
            dest_dir: self.dest_path.clone(),
            remove_after: self.remove,
            overwrite: self.force,
        };
        let task = Task::new(operation, config, self.hosts.clone());

        if self.list {
            return task.list_hosts();
        }

        task.run().await
    }
}
