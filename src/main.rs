// src/main.rs

use anyhow::Result;
use clap::Parser;
use entropy::Settings;
use std::path::{Path, PathBuf};

mod cli;
mod commands;

use cli::{Cli, Commands, ConfCommands};

fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = Path::new(&cli.config);
    let mut settings = if path.exists() {
        Settings::load(path)?
    } else {
        tracing::debug!("{} not found, using default settings", path.display());
        Settings::default()
    };

    if let Some(root) = &cli.root {
        settings.root = PathBuf::from(root);
    }
    settings.finalize()?;
    Ok(settings)
}

fn run(cli: Cli) -> Result<i32> {
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Update {
            repos,
            force,
            quiet,
            wait,
        } => commands::cmd_update(&settings, &repos, force, quiet, wait),
        Commands::Conf(ConfCommands::Info) => commands::cmd_conf_info(&settings),
        Commands::Conf(ConfCommands::Update { auto_only }) => {
            commands::cmd_conf_update(&settings, auto_only)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
