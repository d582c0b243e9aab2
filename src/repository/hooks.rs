// src/repository/hooks.rs

//! Post-sync hooks
//!
//! Hooks run once per sync run, after every requested repository has been
//! processed and only if at least one of them was updated. Failures are
//! logged by the engine and never change the run's exit code.

use tracing::debug;

use crate::cache::{repository_namespace, CacheStore};
use crate::config_files::ConfigReconciler;
use crate::error::Result;
use crate::settings::Settings;

/// Work triggered by a sync run that updated repositories
pub trait PostSyncHook {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Run the hook for the repositories updated in this run
    fn run(&self, updated: &[String]) -> Result<()>;
}

/// Drops every repository-dependent cache and rebuilds the config update scan
///
/// Repository content feeds dependency and atom-match caches for all
/// repositories (results can span repositories), so every configured
/// repository namespace is purged, not only the updated ones.
pub struct CacheRegenerationHook<'a> {
    settings: &'a Settings,
    cache: &'a CacheStore,
}

impl<'a> CacheRegenerationHook<'a> {
    pub fn new(settings: &'a Settings, cache: &'a CacheStore) -> Self {
        Self { settings, cache }
    }
}

impl PostSyncHook for CacheRegenerationHook<'_> {
    fn name(&self) -> &str {
        "cache regeneration"
    }

    fn run(&self, updated: &[String]) -> Result<()> {
        debug!("Regenerating caches after update of {}", updated.join(", "));
        for repo in &self.settings.repositories {
            self.cache.discard_namespace(&repository_namespace(&repo.id))?;
        }

        let mut reconciler = ConfigReconciler::new(self.settings, self.cache);
        let pending = reconciler.scan(false)?.len();
        debug!("Configuration update scan found {} pending updates", pending);
        Ok(())
    }
}
