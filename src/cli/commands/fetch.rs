//! `rossh fetch` - copy files and dirs from target hosts to local.
//!
//! Each host's files land under `<dest-path>/<alias>/`, staged through a
//! task-scoped temporary directory so partial fetches never pollute the
//! destination.

use clap::Args;
use std::path::PathBuf;

use rossh::config::Config;
use rossh::error::Result;
use rossh::task::{Operation, Task};

/// Arguments for the fetch subcommand
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Target hosts: aliases, bracket patterns, or group names
    #[arg(value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Remote files/dirs to copy from the hosts
    #[arg(short = 'f', long = "files", value_name = "PATH", action = clap::ArgAction::Append)]
    pub files: Vec<String>,

    /// Local directory receiving one subdirectory per host
    #[arg(short = 'd', long = "dest-path")]
    pub dest_path: Option<PathBuf>,

    /// Local staging directory
    #[arg(short = 't', long = "tmp-dir", default_value_t = default_tmp_dir())]
    pub tmp_dir: String,

    /// List the resolved hosts without executing
    #[arg(short = 'l', long, conflicts_with = "files")]
    pub list: bool,
}

fn default_tmp_dir() -> String {
    std::env::temp_dir().display().to_string()
}

impl FetchArgs {
    /// Fetch the files from the selected hosts.
    pub async fn execute(&self, config: Config) -> Result<()> {
        let dest_dir = match &self.dest_path {
            Some(path) => path.clone(),
            None if self.list => PathBuf::new(),
            None => {
                return Err(rossh::error::Error::ConfigInvalid(
                    "need a destination: flag '-d/--dest-path'".to_string(),
                ))
            }
        };

        let operation = Operation::Fetch {
            files: self.files.clone(),
            dest_dir,
            tmp_dir: PathBuf::from(&self.tmp_dir),
        };
        let task = Task::new(operation, config, self.hosts.clone());

        if self.list {
            return task.list_hosts();
        }

        task.run().await
    }
}
