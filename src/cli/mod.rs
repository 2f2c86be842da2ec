//! Command-line interface of astra.
//!
//! Argument parsing lives in [`commands`]; rendering of command results in
//! [`output`].

mod commands;
mod output;

pub use commands::{Cli, Commands, DeleteCommands, DescribeCommands, DevArgs, LogFormat, OutputFormat, RunningIn};
pub use output::OutputFormatter;
