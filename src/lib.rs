//! # rossh - Parallel SSH Execution Engine
//!
//! rossh runs an operation — a command, an uploaded script, a file push,
//! or a file fetch — across a fleet of Unix-like hosts with bounded
//! concurrency, collecting one structured result per host and a task
//! summary. It is an ad-hoc, inventory-driven alternative to a
//! configuration-management system: no remote agent, no persistent state,
//! no scheduling across invocations.
//!
//! ## Core Concepts
//!
//! - **Task**: one invocation of the engine over one operation and one
//!   resolved host list
//! - **Inventory**: declarative file enumerating hosts, groups, and
//!   per-entity variables, with bracket pattern expansion
//! - **Vault**: symmetric encryption layer for secrets embedded in
//!   configuration and inventory text
//! - **Dispatcher**: semaphore-bounded fan-out with per-host and
//!   whole-task deadlines
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CLI Interface                         │
//! │          (clap subcommands: exec/script/push/fetch)       │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Task Facade                          │
//! │   (config + vault + inventory binding, result handling)   │
//! └──────────────────────────────────────────────────────────┘
//!               │                            │
//!               ▼                            ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │   Inventory Resolver      │   │    Batch Dispatcher       │
//! │ (groups, vars, patterns)  │   │ (N workers, Tk/Tc/Tt)     │
//! └──────────────────────────┘   └──────────────────────────┘
//!                                             │
//!                                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Per-Host Session Protocol                 │
//! │     (russh: auth ordering, PTY + sudo, SFTP transfer)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rossh::config::Config;
//! use rossh::task::{Operation, Task};
//!
//! #[tokio::main]
//! async fn main() -> rossh::error::Result<()> {
//!     let config = Config::load(None)?;
//!     let operation = Operation::Command { cmd: "uptime".into() };
//!
//!     Task::new(operation, config, vec!["web[01-10]".into()])
//!         .run()
//!         .await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod output;
pub mod task;
pub mod vault;

/// Returns the current version of rossh.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
