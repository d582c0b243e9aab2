// src/repository/mod.rs

//! Package repositories and their synchronization
//!
//! This module provides:
//! - Repository descriptors and the on-disk snapshot layout
//! - The sync engine that downloads, verifies and activates snapshots
//! - Post-sync hooks run after repositories were updated

mod descriptor;
mod hooks;
mod sync;

pub use descriptor::{
    RepositoryDescriptor, CHECKSUM_FILE, DATABASE_FILE, DOWNLOAD_LOCK_FILE, REVISION_FILE,
    STAGING_DIR,
};
pub use hooks::{CacheRegenerationHook, PostSyncHook};
pub use sync::{
    last_successful_sync, read_revision, repositories_are_old, RepositoryStatus,
    RepositorySyncEngine, RepositorySyncOutcome, SyncReport, SyncStatus, REPOSITORY_OLD_DAYS,
};
