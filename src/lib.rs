// src/lib.rs

//! Entropy package manager core
//!
//! Client-side plumbing shared by the `equo` command line tool and other
//! front ends.
//!
//! # Architecture
//!
//! - Repository sync: download, verify and atomically activate database snapshots
//! - Resource lock: one process-wide lock serializing repository mutation
//! - Cache store: keyed on-disk cache for derived data (dependency results,
//!   configuration update scans)
//! - Config updates: discover `._cfg####_name` files left by package merges and
//!   merge or discard them, automatically when the change is trivial
//!
//! All components take a [`Settings`] reference; nothing reads global state.

pub mod cache;
pub mod compression;
pub mod config_files;
mod error;
pub mod fetch;
pub mod hash;
pub mod lock;
pub mod repository;
pub mod settings;

pub use cache::CacheStore;
pub use config_files::{ConfigReconciler, ConfigUpdateCandidate, ScanCache};
pub use error::{Error, Result};
pub use fetch::{FetchClient, FetchOutcome, UriFetcher};
pub use lock::{LockMode, LockRegistry, ResourceLock};
pub use repository::{RepositoryDescriptor, RepositorySyncEngine, SyncReport, SyncStatus};
pub use settings::Settings;
