// src/repository/sync.rs

//! Repository synchronization
//!
//! Brings local repository database snapshots up to date with their remotes.
//! Per repository the engine compares revisions, downloads the compressed
//! database and its checksum into a staging directory, verifies the unpacked
//! database, downloads the revision file, and only then activates the snapshot
//! by renaming the staged files into place. The revision file is always the
//! last file renamed: a readable revision file means the database next to it
//! passed verification.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::descriptor::{
    RepositoryDescriptor, CHECKSUM_FILE, DATABASE_FILE, DOWNLOAD_LOCK_FILE, REVISION_FILE,
};
use super::hooks::{CacheRegenerationHook, PostSyncHook};
use crate::cache::{repository_namespace, CacheStore};
use crate::compression;
use crate::error::Result;
use crate::fetch::{FetchClient, FetchOutcome};
use crate::hash;
use crate::lock::{LockMode, LockRegistry, ResourceLock};
use crate::settings::Settings;

/// Per-step progress is `info!` unless the run is quiet
macro_rules! progress {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            debug!($($arg)+)
        } else {
            info!($($arg)+)
        }
    };
}

/// What happened to one repository during a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryStatus {
    /// Local revision already matches the remote one
    UpToDate,
    /// A new snapshot was verified and activated
    Updated,
    /// Remote is locked, missing, or the repository is not configured
    NotAvailable,
    /// The local directory could not be written
    PermissionDenied,
    /// The download could not be verified or activated; nothing was activated
    Failed,
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryStatus::UpToDate => write!(f, "up to date"),
            RepositoryStatus::Updated => write!(f, "updated"),
            RepositoryStatus::NotAvailable => write!(f, "not available"),
            RepositoryStatus::PermissionDenied => write!(f, "permission denied"),
            RepositoryStatus::Failed => write!(f, "sync error"),
        }
    }
}

/// Outcome of one repository in one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySyncOutcome {
    pub repository_id: String,
    pub status: RepositoryStatus,
    /// Local revision before the run, `None` when absent or unreadable
    pub old_revision: Option<u64>,
    /// Local revision after the run, `None` when absent or unreadable
    pub new_revision: Option<u64>,
}

impl RepositorySyncOutcome {
    fn new(
        repository_id: &str,
        status: RepositoryStatus,
        old_revision: Option<u64>,
        new_revision: Option<u64>,
    ) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            status,
            old_revision,
            new_revision,
        }
    }

    fn is_unavailable(&self) -> bool {
        matches!(
            self.status,
            RepositoryStatus::NotAvailable | RepositoryStatus::PermissionDenied
        )
    }

    fn is_error(&self) -> bool {
        matches!(
            self.status,
            RepositoryStatus::Failed | RepositoryStatus::PermissionDenied
        )
    }
}

/// Overall result of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Every requested repository is up to date or was updated
    Synced,
    /// Some requested repositories were not available
    PartiallySynced,
    /// No requested repository was available
    NotAvailable,
    /// The reachability probe failed; nothing was touched
    Offline,
    /// Another instance holds the resource lock; nothing was touched
    Locked,
    /// No repositories are configured
    NoRepositories,
    /// At least one repository failed verification or could not be written
    SyncErrors,
}

impl SyncStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncStatus::Synced => 0,
            SyncStatus::PartiallySynced => 1,
            SyncStatus::NotAvailable | SyncStatus::Offline => 2,
            SyncStatus::Locked => 4,
            SyncStatus::NoRepositories => 127,
            SyncStatus::SyncErrors => 128,
        }
    }

    fn from_outcomes(outcomes: &[RepositorySyncOutcome]) -> Self {
        let unavailable = outcomes.iter().filter(|o| o.is_unavailable()).count();
        if outcomes.iter().any(|o| o.is_error()) {
            SyncStatus::SyncErrors
        } else if unavailable > 0 && unavailable == outcomes.len() {
            SyncStatus::NotAvailable
        } else if unavailable > 0 {
            SyncStatus::PartiallySynced
        } else {
            SyncStatus::Synced
        }
    }
}

/// Summary of a sync run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// One entry per requested repository, in processing order
    pub outcomes: Vec<RepositorySyncOutcome>,
}

impl SyncReport {
    fn new(status: SyncStatus, outcomes: Vec<RepositorySyncOutcome>) -> Self {
        Self { status, outcomes }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Ids of the repositories updated in this run
    pub fn updated(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RepositoryStatus::Updated)
            .map(|o| o.repository_id.clone())
            .collect()
    }

    pub fn outcome(&self, repository_id: &str) -> Option<&RepositorySyncOutcome> {
        self.outcomes.iter().find(|o| o.repository_id == repository_id)
    }
}

/// Read the local revision of a repository
///
/// Returns `None` when the revision file is missing or its first line is not
/// a base-10 integer.
pub fn read_revision(repo: &RepositoryDescriptor) -> Option<u64> {
    read_revision_file(&repo.revision_file())
}

fn read_revision_file(path: &Path) -> Option<u64> {
    let content = fs::read_to_string(path).ok()?;
    parse_revision(content.as_bytes())
}

fn parse_revision(data: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(data).ok()?;
    text.lines().next()?.trim().parse().ok()
}

/// Days after which the last successful sync is considered old
pub const REPOSITORY_OLD_DAYS: i64 = 10;

/// Time of the last fully successful sync run
///
/// Read from the RFC 3339 stamp in the last-sync file, falling back to the
/// file's modification time when the content does not parse. `None` when
/// the file does not exist or cannot be read.
pub fn last_successful_sync(settings: &Settings) -> Option<DateTime<Utc>> {
    let path = settings.last_sync_path();
    let content = fs::read_to_string(&path).ok()?;
    match DateTime::parse_from_rfc3339(content.trim()) {
        Ok(stamp) => Some(stamp.with_timezone(&Utc)),
        Err(e) => {
            debug!("Last sync stamp in {} unreadable ({}), using mtime", path.display(), e);
            let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
            Some(DateTime::<Utc>::from(modified))
        }
    }
}

/// Whether repositories should be updated, as seen at `now`
///
/// True when no successful sync was recorded or the last one is more than
/// [`REPOSITORY_OLD_DAYS`] away from `now`.
pub fn repositories_are_old(settings: &Settings, now: DateTime<Utc>) -> bool {
    match last_successful_sync(settings) {
        Some(last) => (now - last).num_seconds().abs() > REPOSITORY_OLD_DAYS * 86_400,
        None => true,
    }
}

/// Why a staged update did not activate
enum UpdateFailure {
    Unavailable(String),
    PermissionDenied(String),
    Failed(String),
}

impl UpdateFailure {
    fn io(context: String, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::PermissionDenied {
            UpdateFailure::PermissionDenied(format!("{}: {}", context, e))
        } else {
            UpdateFailure::Failed(format!("{}: {}", context, e))
        }
    }
}

fn rename_into(from: &Path, to: &Path) -> std::result::Result<(), UpdateFailure> {
    fs::rename(from, to).map_err(|e| {
        UpdateFailure::io(format!("Failed to move {} to {}", from.display(), to.display()), e)
    })
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Synchronizes configured repositories with their remotes
pub struct RepositorySyncEngine<'a> {
    settings: &'a Settings,
    fetcher: &'a dyn FetchClient,
    cache: &'a CacheStore,
    lock: ResourceLock,
    hooks: Vec<Box<dyn PostSyncHook + 'a>>,
    wait_for_lock: bool,
}

impl<'a> RepositorySyncEngine<'a> {
    pub fn new(
        settings: &'a Settings,
        fetcher: &'a dyn FetchClient,
        cache: &'a CacheStore,
        registry: Arc<LockRegistry>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            cache,
            lock: ResourceLock::new(settings.lock_path(), registry),
            hooks: Vec::new(),
            wait_for_lock: false,
        }
    }

    /// Wait for the resource lock instead of returning `SyncStatus::Locked`
    pub fn wait_for_lock(mut self, wait: bool) -> Self {
        self.wait_for_lock = wait;
        self
    }

    /// Register a hook run after the built-in cache regeneration
    pub fn add_hook(&mut self, hook: Box<dyn PostSyncHook + 'a>) {
        self.hooks.push(hook);
    }

    /// The resource lock this engine acquires while mutating repositories
    pub fn lock(&self) -> &ResourceLock {
        &self.lock
    }

    /// Synchronize `repository_ids`, or every configured repository if empty
    ///
    /// Transient problems are reported through the returned [`SyncReport`].
    /// `Err` is reserved for lock misuse and failures of the engine's own
    /// bookkeeping.
    pub fn sync(&mut self, repository_ids: &[String], force: bool, quiet: bool) -> Result<SyncReport> {
        if self.settings.repositories.is_empty() {
            warn!("No repositories configured");
            return Ok(SyncReport::new(SyncStatus::NoRepositories, Vec::new()));
        }

        let requested: Vec<String> = if repository_ids.is_empty() {
            self.settings.repositories.iter().map(|r| r.id.clone()).collect()
        } else {
            repository_ids.to_vec()
        };

        if let Some(url) = &self.settings.reachability_url {
            if !self.fetcher.is_reachable(url) {
                warn!("Network is unreachable ({} did not answer), not syncing", url);
                return Ok(SyncReport::new(SyncStatus::Offline, Vec::new()));
            }
        }

        let held_before = self.lock.count();
        let result = self.run(&requested, force, quiet);
        while self.lock.count() > held_before {
            self.lock.release()?;
        }
        result
    }

    fn run(&mut self, requested: &[String], force: bool, quiet: bool) -> Result<SyncReport> {
        let mut outcomes = Vec::with_capacity(requested.len());

        for id in requested {
            let Some(repo) = self.settings.repository(id) else {
                warn!("Repository '{}' is not configured", id);
                outcomes.push(RepositorySyncOutcome::new(
                    id,
                    RepositoryStatus::NotAvailable,
                    None,
                    None,
                ));
                continue;
            };

            let old_revision = read_revision(repo);
            let remote_revision = self.remote_revision(repo);
            progress!(
                quiet,
                "Repository {}: local revision {}, remote revision {}",
                repo.id,
                fmt_revision(old_revision),
                fmt_revision(remote_revision)
            );

            if !force && remote_revision.is_some() && remote_revision == old_revision {
                progress!(quiet, "Repository {} is up to date", repo.id);
                outcomes.push(RepositorySyncOutcome::new(
                    &repo.id,
                    RepositoryStatus::UpToDate,
                    old_revision,
                    old_revision,
                ));
                continue;
            }

            if self.remote_locked(repo) {
                warn!("Repository {} is being updated remotely, try again later", repo.id);
                outcomes.push(RepositorySyncOutcome::new(
                    &repo.id,
                    RepositoryStatus::NotAvailable,
                    old_revision,
                    old_revision,
                ));
                continue;
            }

            if !self.ensure_locked()? {
                warn!(
                    "Resources at {} are locked by another instance, not syncing",
                    self.lock.path().display()
                );
                return Ok(SyncReport::new(SyncStatus::Locked, outcomes));
            }

            if let Err(e) = self.cache.discard_namespace(&repository_namespace(&repo.id)) {
                warn!("Failed to invalidate caches for {}: {}", repo.id, e);
            }

            let status = self.update_repository(repo, quiet);
            let new_revision = read_revision(repo);
            if status == RepositoryStatus::Updated {
                progress!(
                    quiet,
                    "Repository {} updated to revision {}",
                    repo.id,
                    fmt_revision(new_revision)
                );
                self.run_post_update_script(repo);
            }
            outcomes.push(RepositorySyncOutcome::new(&repo.id, status, old_revision, new_revision));
        }

        let report = SyncReport::new(SyncStatus::from_outcomes(&outcomes), outcomes);

        let updated = report.updated();
        if !updated.is_empty() {
            self.run_hooks(&updated);
        }

        if report.status == SyncStatus::Synced {
            self.touch_last_sync();
        }
        Ok(report)
    }

    /// Take the resource lock if this run does not hold it yet
    fn ensure_locked(&mut self) -> Result<bool> {
        if self.lock.mode() == Some(LockMode::Exclusive) {
            return Ok(true);
        }
        if self.wait_for_lock {
            self.lock.wait_exclusive()?;
            Ok(true)
        } else {
            self.lock.try_acquire_exclusive()
        }
    }

    fn remote_revision(&self, repo: &RepositoryDescriptor) -> Option<u64> {
        match self.fetcher.fetch_bytes(&repo.remote_url(REVISION_FILE)) {
            Ok(data) => parse_revision(&data),
            Err(e) => {
                debug!("Remote revision of {} unknown: {}", repo.id, e);
                None
            }
        }
    }

    fn remote_locked(&self, repo: &RepositoryDescriptor) -> bool {
        self.fetcher
            .fetch_bytes(&repo.remote_url(DOWNLOAD_LOCK_FILE))
            .is_ok()
    }

    fn update_repository(&self, repo: &RepositoryDescriptor, quiet: bool) -> RepositoryStatus {
        let staging = repo.staging_dir();
        let result = self.stage_and_activate(repo, &staging, quiet);

        if let Err(e) = fs::remove_dir_all(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to clean up {}: {}", staging.display(), e);
            }
        }

        match result {
            Ok(()) => RepositoryStatus::Updated,
            Err(UpdateFailure::Unavailable(reason)) => {
                warn!("Repository {} is not available: {}", repo.id, reason);
                RepositoryStatus::NotAvailable
            }
            Err(UpdateFailure::PermissionDenied(reason)) => {
                error!("Repository {}: {}", repo.id, reason);
                RepositoryStatus::PermissionDenied
            }
            Err(UpdateFailure::Failed(reason)) => {
                error!("Repository {} was not updated: {}", repo.id, reason);
                RepositoryStatus::Failed
            }
        }
    }

    fn stage_and_activate(
        &self,
        repo: &RepositoryDescriptor,
        staging: &Path,
        quiet: bool,
    ) -> std::result::Result<(), UpdateFailure> {
        match fs::remove_dir_all(staging) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(UpdateFailure::io(
                    format!("Failed to clear {}", staging.display()),
                    e,
                ));
            }
            _ => {}
        }
        fs::create_dir_all(staging).map_err(|e| {
            UpdateFailure::io(format!("Failed to create {}", staging.display()), e)
        })?;

        let artifact_name = repo.artifact_name();
        let artifact = staging.join(&artifact_name);
        progress!(quiet, "Downloading {} for {}", artifact_name, repo.id);
        if let FetchOutcome::Failed { reason } =
            self.fetcher.fetch(&repo.remote_url(&artifact_name), &artifact)
        {
            return Err(UpdateFailure::Unavailable(reason));
        }

        let checksum = staging.join(CHECKSUM_FILE);
        if let FetchOutcome::Failed { reason } =
            self.fetcher.fetch(&repo.remote_url(CHECKSUM_FILE), &checksum)
        {
            return Err(UpdateFailure::Failed(format!("checksum file unavailable: {}", reason)));
        }

        let database = staging.join(DATABASE_FILE);
        progress!(quiet, "Unpacking {} ({})", artifact_name, repo.compression_format);
        compression::unpack_file(&artifact, &database, repo.compression_format)
            .map_err(|e| UpdateFailure::Failed(e.to_string()))?;

        progress!(quiet, "Verifying database checksum for {}", repo.id);
        let expected = hash::read_checksum_file(&checksum)
            .map_err(|e| UpdateFailure::Failed(e.to_string()))?;
        hash::verify_file(&database, &expected).map_err(|e| UpdateFailure::Failed(e.to_string()))?;

        let revision = staging.join(REVISION_FILE);
        if let FetchOutcome::Failed { reason } =
            self.fetcher.fetch(&repo.remote_url(REVISION_FILE), &revision)
        {
            return Err(UpdateFailure::Unavailable(format!("revision file unavailable: {}", reason)));
        }
        if read_revision_file(&revision).is_none() {
            return Err(UpdateFailure::Failed("remote revision file is malformed".to_string()));
        }

        self.activate(repo, staging)
    }

    /// Rename the verified snapshot into place, revision file last
    fn activate(
        &self,
        repo: &RepositoryDescriptor,
        staging: &Path,
    ) -> std::result::Result<(), UpdateFailure> {
        let live_revision = repo.revision_file();
        remove_if_exists(&live_revision).map_err(|e| {
            UpdateFailure::io(format!("Failed to remove {}", live_revision.display()), e)
        })?;

        rename_into(&staging.join(repo.artifact_name()), &repo.artifact_file())?;
        rename_into(&staging.join(CHECKSUM_FILE), &repo.checksum_file())?;
        rename_into(&staging.join(DATABASE_FILE), &repo.database_file())?;
        rename_into(&staging.join(REVISION_FILE), &live_revision)
    }

    fn run_post_update_script(&self, repo: &RepositoryDescriptor) {
        let Some(script) = &repo.post_update_script else {
            return;
        };
        if !script.is_file() {
            debug!("Post-update script {} not found, skipping", script.display());
            return;
        }

        let status = Command::new("/bin/sh")
            .arg(script)
            .arg(&repo.id)
            .arg(self.settings.root_arg())
            .arg(&self.settings.branch)
            .status();
        match status {
            Ok(status) if status.success() => {
                debug!("Post-update script for {} completed", repo.id);
            }
            Ok(status) => {
                warn!("Post-update script for {} exited with {}", repo.id, status);
            }
            Err(e) => {
                warn!("Failed to run post-update script for {}: {}", repo.id, e);
            }
        }
    }

    fn run_hooks(&self, updated: &[String]) {
        let regeneration = CacheRegenerationHook::new(self.settings, self.cache);
        run_hook(&regeneration, updated);
        for hook in &self.hooks {
            run_hook(hook.as_ref(), updated);
        }
    }

    fn touch_last_sync(&self) {
        let path = self.settings.last_sync_path();
        let result = fs::create_dir_all(&self.settings.work_dir)
            .and_then(|_| fs::write(&path, format!("{}\n", Utc::now().to_rfc3339())));
        if let Err(e) = result {
            warn!("Failed to record last sync time in {}: {}", path.display(), e);
        }
    }
}

fn run_hook(hook: &dyn PostSyncHook, updated: &[String]) {
    if let Err(e) = hook.run(updated) {
        warn!("Post-sync hook '{}' failed: {}", hook.name(), e);
    }
}

fn fmt_revision(revision: Option<u64>) -> String {
    revision.map_or_else(|| "unknown".to_string(), |r| r.to_string())
}
