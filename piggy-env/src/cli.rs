//! Command line interface.
//!
//! Two shapes: `piggy-env install <dst>` copies the running binary into the
//! shared volume, and `piggy-env [flags] -- <cmd> [args...]` is the wrapper
//! entrypoint mode.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "piggy-env",
    about = "Bootstrap agent injecting secrets into the process environment before exec",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Fetch secrets directly from the cloud store, bypassing the secret
    /// server.
    #[arg(long)]
    pub standalone: bool,

    /// Number of secret request attempts.
    #[arg(long, value_name = "N")]
    pub retry: Option<u32>,

    /// Sleep before the first fetch, e.g. `5s` or `500ms`.
    #[arg(long, value_name = "DURATION")]
    pub initial_delay: Option<String>,

    /// The user command, after `--`.
    #[arg(last = true, value_name = "CMD")]
    pub user_command: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy the running binary to the destination so user containers can
    /// invoke it.
    Install {
        /// Target file, or directory to receive `piggy-env`.
        destination: PathBuf,
    },
}
