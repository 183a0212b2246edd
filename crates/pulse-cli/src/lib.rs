//! Pulse CLI library.
//!
//! Argument parsing, configuration and subcommands for the `pulse` binary.

mod cli;
pub mod commands;
mod config;

pub use cli::{BucketsAction, Cli, Commands};
pub use config::{Config, HeartbeatSettings, QuerySettings};
