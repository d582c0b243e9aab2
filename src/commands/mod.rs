// src/commands/mod.rs
//! Command handlers for the equo CLI
//!
//! Handlers return the process exit code; errors are reported by `main`.

mod conf;
mod update;

pub use conf::{cmd_conf_info, cmd_conf_update};
pub use update::cmd_update;

use anyhow::Result;
use entropy::{CacheStore, Settings};

fn open_cache(settings: &Settings) -> Result<CacheStore> {
    let root = settings.cache_dir();
    std::fs::create_dir_all(&root)?;
    Ok(CacheStore::new(root))
}
