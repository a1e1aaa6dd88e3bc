//! Command-line interface for ephemera.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
