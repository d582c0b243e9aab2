// src/commands/update.rs
//! Repository synchronization command

use super::open_cache;
use anyhow::Result;
use entropy::repository::{last_successful_sync, RepositoryStatus, SyncStatus};
use entropy::{LockRegistry, RepositorySyncEngine, Settings, UriFetcher};
use std::sync::Arc;
use tracing::info;

fn fmt_revision(revision: Option<u64>) -> String {
    revision.map_or_else(|| "-".to_string(), |r| r.to_string())
}

/// Synchronize repositories and print one line per repository
pub fn cmd_update(
    settings: &Settings,
    repos: &[String],
    force: bool,
    quiet: bool,
    wait: bool,
) -> Result<i32> {
    info!("Synchronizing repositories");

    let cache = open_cache(settings)?;
    let fetcher = UriFetcher::new()?.with_progress(!quiet);
    let registry = Arc::new(LockRegistry::new());
    let mut engine =
        RepositorySyncEngine::new(settings, &fetcher, &cache, registry).wait_for_lock(wait);

    let report = engine.sync(repos, force, quiet)?;

    for outcome in &report.outcomes {
        let marker = match outcome.status {
            RepositoryStatus::UpToDate | RepositoryStatus::Updated => "OK",
            RepositoryStatus::NotAvailable => "UNAVAILABLE",
            RepositoryStatus::PermissionDenied | RepositoryStatus::Failed => "FAILED",
        };
        println!(
            "  [{}] {}: {} (revision {} -> {})",
            marker,
            outcome.repository_id,
            outcome.status,
            fmt_revision(outcome.old_revision),
            fmt_revision(outcome.new_revision)
        );
    }

    match report.status {
        SyncStatus::Synced => println!("Repositories synchronized"),
        SyncStatus::PartiallySynced => println!("Some repositories are not available"),
        SyncStatus::NotAvailable => println!("No repositories available"),
        SyncStatus::Offline => println!("Network unreachable, repositories not synchronized"),
        SyncStatus::Locked => println!("Another instance is using the repositories, try again later"),
        SyncStatus::NoRepositories => println!("No repositories configured"),
        SyncStatus::SyncErrors => println!("Errors occurred while synchronizing repositories"),
    }

    if report.status != SyncStatus::Synced {
        match last_successful_sync(settings) {
            Some(last) => println!("Last successful synchronization: {}", last.to_rfc3339()),
            None => println!("Repositories were never synchronized successfully"),
        }
    }

    Ok(report.exit_code())
}
