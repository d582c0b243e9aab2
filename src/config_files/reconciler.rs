// src/config_files/reconciler.rs

//! Scanning for and resolving pending configuration file updates

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::diff::{is_automergeable, unified_diff};
use super::marker::{backup_path, destination_for};
use super::{CacheLookup, ConfigUpdateCandidate, MissReason, ScanCache, SCAN_CACHE_KEY};
use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Finds, classifies and resolves `._cfg####_name` markers
///
/// Keys handed out by one reconciler keep counting up across rescans, so a
/// key seen by the user never silently starts pointing at another file.
pub struct ConfigReconciler<'a> {
    settings: &'a Settings,
    cache: &'a CacheStore,
    scandata: Option<ScanCache>,
    next_key: u32,
}

impl<'a> ConfigReconciler<'a> {
    pub fn new(settings: &'a Settings, cache: &'a CacheStore) -> Self {
        Self {
            settings,
            cache,
            scandata: None,
            next_key: 1,
        }
    }

    /// Host path of a root-relative candidate path
    pub fn root_path(&self, path: &Path) -> PathBuf {
        self.settings.root_join(path)
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(self.root_path(path)).is_ok()
    }

    fn validate(&self, scan: &ScanCache) -> std::result::Result<(), PathBuf> {
        match scan.iter().find(|(_, c)| !self.exists(&c.source_path)) {
            Some((_, candidate)) => Err(candidate.source_path.clone()),
            None => Ok(()),
        }
    }

    /// Load the persisted scan and check that it is still usable
    pub fn lookup_cache(&self) -> CacheLookup {
        let Some(scan) = self.cache.pop::<ScanCache>(SCAN_CACHE_KEY) else {
            return CacheLookup::Miss(MissReason::Absent);
        };
        match self.validate(&scan) {
            Ok(()) => CacheLookup::Hit(scan),
            Err(missing) => CacheLookup::Miss(MissReason::MissingSource(missing)),
        }
    }

    fn adopt(&mut self, scan: ScanCache) -> &ScanCache {
        if let Some(max) = scan.max_key() {
            self.next_key = self.next_key.max(max.saturating_add(1));
        }
        &*self.scandata.insert(scan)
    }

    fn allocate_key(&mut self) -> u32 {
        let key = self.next_key;
        self.next_key = self.next_key.saturating_add(1);
        key
    }

    fn persist(&self) {
        if let Some(scan) = &self.scandata {
            if let Err(e) = self.cache.push(SCAN_CACHE_KEY, scan) {
                warn!("Failed to store configuration update cache: {}", e);
            }
        }
    }

    /// Pending updates, from cache when allowed and valid, else by walking
    ///
    /// With `use_cache` the in-memory scan is preferred, then the persisted
    /// one; either is discarded as a whole if any of its sources has vanished.
    pub fn scan(&mut self, use_cache: bool) -> Result<&ScanCache> {
        if use_cache {
            if let Some(scan) = self.scandata.take() {
                match self.validate(&scan) {
                    Ok(()) => return Ok(&*self.scandata.insert(scan)),
                    Err(missing) => debug!(
                        "Configuration update cache references missing {}, rescanning",
                        missing.display()
                    ),
                }
            } else {
                match self.lookup_cache() {
                    CacheLookup::Hit(scan) => return Ok(self.adopt(scan)),
                    CacheLookup::Miss(reason) => {
                        debug!("Configuration update cache unusable ({:?}), rescanning", reason)
                    }
                }
            }
        }

        let scan = self.walk();
        self.scandata = Some(scan);
        self.persist();
        Ok(&*self.scandata.get_or_insert_with(ScanCache::default))
    }

    fn ensure_scanned(&mut self) -> Result<()> {
        if self.scandata.is_none() {
            self.scan(true)?;
        }
        Ok(())
    }

    fn walk(&mut self) -> ScanCache {
        let settings = self.settings;
        let masks: Vec<PathBuf> = settings
            .config_protect_mask
            .iter()
            .map(|mask| settings.root_join(mask))
            .collect();
        let mut scan = ScanCache::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for protect in &settings.config_protect {
            let protect_path = settings.root_join(protect);
            let (walk_root, only_name, max_depth) = match fs::metadata(&protect_path) {
                Ok(meta) if meta.is_dir() => (protect_path.clone(), None, usize::MAX),
                Ok(_) => match (protect_path.parent(), protect_path.file_name()) {
                    (Some(parent), Some(name)) => {
                        (parent.to_path_buf(), Some(name.to_os_string()), 1)
                    }
                    _ => continue,
                },
                Err(e) => {
                    debug!("Skipping protected path {}: {}", protect_path.display(), e);
                    continue;
                }
            };

            let walker = WalkDir::new(&walk_root)
                .follow_links(false)
                .max_depth(max_depth)
                .into_iter()
                .filter_entry(|entry| !masks.iter().any(|mask| entry.path().starts_with(mask)));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Error walking {}: {}", walk_root.display(), e);
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }

                let marker_path = entry.path();
                let Some((_, destination)) = destination_for(marker_path) else {
                    continue;
                };
                if let Some(name) = &only_name {
                    if destination.file_name() != Some(name.as_os_str()) {
                        continue;
                    }
                }
                // Masks naming a single file exclude the markers staged for it
                if masks.iter().any(|mask| destination.starts_with(mask)) {
                    continue;
                }
                if !seen.insert(marker_path.to_path_buf()) {
                    continue;
                }

                if let Some(candidate) = self.classify(marker_path) {
                    let key = self.allocate_key();
                    debug!(
                        "({}) pending update {} (automerge: {})",
                        key,
                        candidate.destination_path.display(),
                        candidate.automerge
                    );
                    scan.insert(key, candidate);
                }
            }
        }

        info!("Found {} pending configuration file updates", scan.len());
        scan
    }

    /// Build a candidate for a marker given as a host path
    fn classify(&self, marker_path: &Path) -> Option<ConfigUpdateCandidate> {
        let (revision_tag, destination) = destination_for(marker_path)?;
        Some(ConfigUpdateCandidate {
            revision_tag,
            automerge: is_automergeable(marker_path, &destination),
            source_path: self.settings.strip_root(marker_path),
            destination_path: self.settings.strip_root(&destination),
        })
    }

    /// Current scan, if one has been loaded or built
    pub fn candidates(&self) -> Option<&ScanCache> {
        self.scandata.as_ref()
    }

    pub fn get(&self, key: u32) -> Option<&ConfigUpdateCandidate> {
        self.scandata.as_ref().and_then(|scan| scan.get(key))
    }

    fn candidate(&self, key: u32) -> Result<ConfigUpdateCandidate> {
        self.get(key)
            .cloned()
            .ok_or_else(|| Error::NotFoundError(format!("No pending configuration update {}", key)))
    }

    /// Pending updates without applying anything
    pub fn info(&mut self) -> Result<&ScanCache> {
        self.scan(true)
    }

    /// Merge every candidate marked automerge, returning how many were merged
    ///
    /// With `dry_run` nothing is touched and the number of candidates that
    /// qualify is returned. A candidate whose merge fails is logged and stays
    /// cached; the remaining candidates are still merged.
    pub fn resolve_auto(&mut self, dry_run: bool) -> Result<usize> {
        self.ensure_scanned()?;
        let keys: Vec<u32> = self
            .scandata
            .as_ref()
            .map(|scan| {
                scan.iter()
                    .filter(|(_, candidate)| candidate.automerge)
                    .map(|(key, _)| key)
                    .collect()
            })
            .unwrap_or_default();

        if dry_run {
            return Ok(keys.len());
        }

        let mut merged = 0;
        for key in keys {
            match self.merge(key) {
                Ok(true) => merged += 1,
                Ok(false) => {}
                Err(e) => warn!("Automatic merge of update {} failed: {}", key, e),
            }
        }
        Ok(merged)
    }

    /// Replace the destination with the staged file
    ///
    /// The destination is backed up first when backups are enabled, and the
    /// new file takes over the destination's permissions and ownership.
    /// Returns `false` when the source had already vanished; the stale entry is
    /// dropped either way.
    pub fn merge(&mut self, key: u32) -> Result<bool> {
        let candidate = self.candidate(key)?;
        let source = self.root_path(&candidate.source_path);
        let destination = self.root_path(&candidate.destination_path);

        let moved = match fs::symlink_metadata(&source) {
            Ok(source_meta) => {
                if self.settings.files_backup && destination.is_file() {
                    self.backup(&destination)?;
                }
                if !source_meta.file_type().is_symlink() {
                    inherit_attributes(&source, &destination);
                }
                fs::rename(&source, &destination).map_err(|e| {
                    Error::IoError(format!(
                        "Failed to move {} to {}: {}",
                        source.display(),
                        destination.display(),
                        e
                    ))
                })?;
                info!("Merged {}", destination.display());
                true
            }
            Err(_) => {
                debug!("{} vanished, dropping stale entry", source.display());
                false
            }
        };

        self.forget(key);
        Ok(moved)
    }

    fn backup(&self, destination: &Path) -> Result<PathBuf> {
        let backup = backup_path(destination).ok_or_else(|| {
            Error::IoError(format!("Cannot derive a backup name for {}", destination.display()))
        })?;
        fs::copy(destination, &backup).map_err(|e| {
            Error::IoError(format!(
                "Failed to back up {} to {}: {}",
                destination.display(),
                backup.display(),
                e
            ))
        })?;
        debug!("Backed up {} to {}", destination.display(), backup.display());
        Ok(backup)
    }

    /// Delete the staged file and keep the destination as it is
    pub fn discard(&mut self, key: u32) -> Result<()> {
        let candidate = self.candidate(key)?;
        let source = self.root_path(&candidate.source_path);

        match fs::remove_file(&source) {
            Ok(()) => info!("Discarded {}", source.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to remove {}: {}",
                    source.display(),
                    e
                )));
            }
        }

        self.forget(key);
        Ok(())
    }

    /// Drop an entry without touching any file
    pub fn forget(&mut self, key: u32) {
        if let Some(scan) = self.scandata.as_mut() {
            scan.remove(key);
        }
        self.persist();
    }

    /// Insert a marker discovered outside a scan, returning its key
    ///
    /// `marker_path` is a host path. An existing entry for the same source is
    /// replaced.
    pub fn add(&mut self, marker_path: &Path) -> Result<u32> {
        let candidate = self.classify(marker_path).ok_or_else(|| {
            Error::ParseError(format!(
                "{} is not a configuration update marker",
                marker_path.display()
            ))
        })?;

        self.ensure_scanned()?;
        let key = {
            let scan = self.scandata.get_or_insert_with(ScanCache::default);
            while let Some(existing) = scan.find_source(&candidate.source_path) {
                scan.remove(existing);
            }
            let max = scan.max_key().unwrap_or(0);
            self.next_key = self.next_key.max(max.saturating_add(1));
            self.allocate_key()
        };

        if let Some(scan) = self.scandata.as_mut() {
            scan.insert(key, candidate);
        }
        self.persist();
        Ok(key)
    }

    /// Recompute automerge for one entry, e.g. after the source was edited
    pub fn rediff(&mut self, key: u32) -> Result<bool> {
        let candidate = self.candidate(key)?;
        let automerge = is_automergeable(
            &self.root_path(&candidate.source_path),
            &self.root_path(&candidate.destination_path),
        );
        if let Some(entry) = self.scandata.as_mut().and_then(|scan| scan.get_mut(key)) {
            entry.automerge = automerge;
        }
        self.persist();
        Ok(automerge)
    }

    /// Unified diff from the live file to the staged one
    pub fn diff(&self, key: u32) -> Result<String> {
        let candidate = self.candidate(key)?;
        unified_diff(
            &self.root_path(&candidate.source_path),
            &self.root_path(&candidate.destination_path),
        )
        .map_err(|e| Error::IoError(format!("Failed to diff update {}: {}", key, e)))
    }

    /// Forget the current scan, in memory and on disk
    pub fn invalidate(&mut self) -> Result<()> {
        self.scandata = None;
        self.cache.discard(SCAN_CACHE_KEY)
    }
}

/// Give `source` the mode and ownership of `destination`, when it exists
fn inherit_attributes(source: &Path, destination: &Path) {
    let Ok(meta) = fs::metadata(destination) else {
        return;
    };

    let mode = meta.permissions().mode();
    if let Err(e) = fs::set_permissions(source, fs::Permissions::from_mode(mode)) {
        debug!("Failed to copy mode to {}: {}", source.display(), e);
    }
    if let Err(e) = chown(source, Some(meta.uid()), Some(meta.gid())) {
        debug!("Failed to copy ownership to {}: {}", source.display(), e);
    }
}
