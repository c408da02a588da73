//! `rossh exec` - run a command on target hosts.

use clap::Args;

use rossh::config::Config;
use rossh::error::Result;
use rossh::task::{Operation, Task};

/// Arguments for the exec subcommand
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Target hosts: aliases, bracket patterns, or group names
    #[arg(value_name = "HOST")]
    pub hosts: Vec<String>,

    /// The command to run
    #[arg(short = 'e', long = "execute", value_name = "COMMAND")]
    pub execute: Option<String>,

    /// List the resolved hosts without executing
    #[arg(short = 'l', long, conflicts_with = "execute")]
    pub list: bool,
}

impl ExecArgs {
    /// Execute the command across the selected hosts.
    pub async fn execute(&self, config: Config) -> Result<()> {
        let operation = Operation::Command {
            cmd: self.execute.clone().unwrap_or_default(),
        };
        let task = Task::new(operation, config, self.hosts.clone());

        if self.list {
            return task.list_hosts();
        }

        task.run().await
    }
}
