// src/settings.rs

//! Client settings
//!
//! A single [`Settings`] value is loaded once at process start and passed by
//! reference to the sync engine and the configuration file reconciler. Nothing
//! in the library reads configuration from global state.
//!
//! ```toml
//! root = "/"
//! work_dir = "/var/lib/entropy"
//! branch = "5"
//! reachability_url = "https://www.sabayon.org"
//! config_protect = ["/etc"]
//! config_protect_mask = ["/etc/env.d"]
//!
//! [[repository]]
//! id = "sabayonlinux.org"
//! database_url = "https://pkg.sabayon.org/standard/sabayonlinux.org/database/amd64/5"
//! compression_format = "bz2"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::repository::RepositoryDescriptor;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/entropy/equo.toml";

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/entropy")
}

fn default_branch() -> String {
    "5".to_string()
}

fn default_files_backup() -> bool {
    true
}

/// Process-wide client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// System root prefix for chroot or offline installs
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// State directory for repositories, caches and the resource lock
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Cache store directory, `<work_dir>/caches` when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Resource lock file, `<work_dir>/.using_resources` when unset
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    /// Distribution branch passed to post-update scripts
    #[serde(default = "default_branch")]
    pub branch: String,

    /// URL probed once per sync run to detect that the network is down
    #[serde(default)]
    pub reachability_url: Option<String>,

    /// Keep a backup of every configuration file replaced by a merge
    #[serde(default = "default_files_backup")]
    pub files_backup: bool,

    /// Root-relative paths scanned for pending configuration file updates
    #[serde(default)]
    pub config_protect: Vec<PathBuf>,

    /// Root-relative paths excluded from the scan
    #[serde(default)]
    pub config_protect_mask: Vec<PathBuf>,

    /// Configured repositories, in priority order
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryDescriptor>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: default_root(),
            work_dir: default_work_dir(),
            cache_dir: None,
            lock_path: None,
            branch: default_branch(),
            reachability_url: None,
            files_backup: default_files_backup(),
            config_protect: Vec::new(),
            config_protect_mask: Vec::new(),
            repositories: Vec::new(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded settings from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.finalize()?;
        Ok(settings)
    }

    /// Fill in derived defaults and validate the result
    ///
    /// Called by the loaders; callers building `Settings` by hand should call
    /// it once after setting fields.
    pub fn finalize(&mut self) -> Result<()> {
        for repo in &mut self.repositories {
            if repo.local_db_path.as_os_str().is_empty() {
                repo.local_db_path = self.work_dir.join("repositories").join(&repo.id);
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut paths = HashSet::new();

        for repo in &self.repositories {
            if repo.id.trim().is_empty() {
                return Err(Error::ConfigError("Repository id must not be empty".to_string()));
            }
            if repo.id.contains('/') {
                return Err(Error::ConfigError(format!(
                    "Repository id '{}' must not contain '/'",
                    repo.id
                )));
            }
            if !ids.insert(repo.id.as_str()) {
                return Err(Error::ConfigError(format!("Duplicate repository id '{}'", repo.id)));
            }
            if !paths.insert(repo.local_db_path.as_path()) {
                return Err(Error::ConfigError(format!(
                    "Repository '{}' shares local_db_path {} with another repository",
                    repo.id,
                    repo.local_db_path.display()
                )));
            }
            Url::parse(&repo.database_url).map_err(|e| {
                Error::ConfigError(format!(
                    "Repository '{}' has an invalid database_url '{}': {}",
                    repo.id, repo.database_url, e
                ))
            })?;
        }

        if let Some(url) = &self.reachability_url {
            Url::parse(url).map_err(|e| {
                Error::ConfigError(format!("Invalid reachability_url '{}': {}", url, e))
            })?;
        }

        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("caches"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| self.work_dir.join(".using_resources"))
    }

    /// File touched after every fully successful sync
    pub fn last_sync_path(&self) -> PathBuf {
        self.work_dir.join("last_sync")
    }

    /// Look up a configured repository by id
    pub fn repository(&self, id: &str) -> Option<&RepositoryDescriptor> {
        self.repositories.iter().find(|repo| repo.id == id)
    }

    /// Join a root-relative path onto the system root
    ///
    /// ```
    /// use entropy::Settings;
    /// use std::path::{Path, PathBuf};
    ///
    /// let mut settings = Settings::default();
    /// settings.root = PathBuf::from("/mnt/target");
    /// assert_eq!(settings.root_join(Path::new("/etc/make.conf")),
    ///            PathBuf::from("/mnt/target/etc/make.conf"));
    /// ```
    pub fn root_join(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root.join(relative)
    }

    /// Inverse of [`Settings::root_join`]
    ///
    /// Paths outside the root are returned unchanged.
    pub fn strip_root(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => Path::new("/").join(relative),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Root prefix as passed to post-update scripts, always ending in `/`
    pub fn root_arg(&self) -> String {
        let root = self.root.to_string_lossy();
        if root.ends_with('/') {
            root.into_owned()
        } else {
            format!("{}/", root)
        }
    }
}
