//! Subcommand implementations.

pub mod exec;
pub mod fetch;
pub mod push;
pub mod script;
pub mod vault;
