// src/cli/conf.rs
//! Configuration file update commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfCommands {
    /// List pending configuration file updates
    Info,

    /// Resolve pending configuration file updates
    Update {
        /// Merge trivial updates and exit without prompting
        #[arg(short, long)]
        auto_only: bool,
    },
}
