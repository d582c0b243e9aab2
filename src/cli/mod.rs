// src/cli/mod.rs
//! CLI definitions for the equo client
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `update` - Synchronize repositories
//! - `conf` - Inspect and resolve pending configuration file updates

use clap::{Parser, Subcommand};

mod conf;

pub use conf::ConfCommands;

#[derive(Parser)]
#[command(name = "equo")]
#[command(author = "Entropy Project")]
#[command(version)]
#[command(about = "Entropy package manager client", long_about = None)]
pub struct Cli {
    /// Path to the settings file
    #[arg(short, long, global = true, default_value = entropy::settings::DEFAULT_SETTINGS_PATH)]
    pub config: String,

    /// Operate on a system mounted at this root instead of /
    #[arg(short, long, global = true)]
    pub root: Option<String>,

    /// Log progress information
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize repositories
    Update {
        /// Repository ids to synchronize (all configured ones if omitted)
        repos: Vec<String>,

        /// Download even when the remote revision matches the local one
        #[arg(short, long)]
        force: bool,

        /// Only report the final result of each repository
        #[arg(short, long)]
        quiet: bool,

        /// Wait for other instances to release the resource lock
        #[arg(short, long)]
        wait: bool,
    },

    /// Configuration file updates
    #[command(subcommand)]
    Conf(ConfCommands),
}
