//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Control plane for a distributed HLS transcoding fleet.
#[derive(Parser, Debug)]
#[command(name = "transcode-conductor", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "conductor.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands for the conductor.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the dispatcher, sweeper and admin server.
    Run(RunArgs),

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration.
    #[command(name = "config-show")]
    ConfigShow,

    /// List recent tasks in the queue.
    #[command(name = "tasks-list")]
    TasksList,

    /// Delete terminal tasks older than the retention window.
    #[command(name = "tasks-purge")]
    TasksPurge {
        /// Retention window in days.
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

/// Arguments for the run subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Start without restoring in-flight tasks from the queue.
    #[arg(long, default_value = "false")]
    pub skip_restore: bool,
}
