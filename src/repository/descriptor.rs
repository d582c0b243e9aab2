// src/repository/descriptor.rs

//! Repository descriptors and the on-disk layout of a repository snapshot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compression::CompressionFormat;

/// Name of the uncompressed repository database
pub const DATABASE_FILE: &str = "packages.db";

/// Name of the checksum file paired with the database
pub const CHECKSUM_FILE: &str = "packages.db.md5";

/// Name of the revision file, always written last
pub const REVISION_FILE: &str = "packages.db.revision";

/// Remote-only marker signalling that the publisher is updating the repository
pub const DOWNLOAD_LOCK_FILE: &str = "packages.db.download.lock";

/// Directory under `local_db_path` where downloads are staged before activation
pub const STAGING_DIR: &str = ".staging";

/// A configured remote repository and its local mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Unique repository identifier
    pub id: String,

    /// Base URL where the database artifacts are published
    pub database_url: String,

    /// Ordered package binary mirrors
    #[serde(default)]
    pub package_mirrors: Vec<String>,

    /// Local directory holding the database snapshot
    ///
    /// Left empty in the configuration file to use
    /// `<work_dir>/repositories/<id>`.
    #[serde(default)]
    pub local_db_path: PathBuf,

    /// Format of the published database artifact
    #[serde(default)]
    pub compression_format: CompressionFormat,

    /// Shell script run after this repository has been updated
    #[serde(default)]
    pub post_update_script: Option<PathBuf>,
}

impl RepositoryDescriptor {
    /// Create a descriptor with default mirrors, format and no script
    pub fn new(
        id: impl Into<String>,
        database_url: impl Into<String>,
        local_db_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            database_url: database_url.into(),
            package_mirrors: Vec::new(),
            local_db_path: local_db_path.into(),
            compression_format: CompressionFormat::default(),
            post_update_script: None,
        }
    }

    pub fn database_file(&self) -> PathBuf {
        self.local_db_path.join(DATABASE_FILE)
    }

    pub fn checksum_file(&self) -> PathBuf {
        self.local_db_path.join(CHECKSUM_FILE)
    }

    pub fn revision_file(&self) -> PathBuf {
        self.local_db_path.join(REVISION_FILE)
    }

    /// Local path of the compressed artifact
    pub fn artifact_file(&self) -> PathBuf {
        self.local_db_path.join(self.artifact_name())
    }

    /// Name of the compressed artifact for this repository's format
    pub fn artifact_name(&self) -> String {
        self.compression_format.artifact_name(DATABASE_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.local_db_path.join(STAGING_DIR)
    }

    /// URL of a file published next to the remote database
    pub fn remote_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.database_url.trim_end_matches('/'), file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let repo = RepositoryDescriptor::new("main", "file:///srv/main/", "/var/lib/entropy/main");

        assert_eq!(repo.database_file(), PathBuf::from("/var/lib/entropy/main/packages.db"));
        assert_eq!(repo.checksum_file(), PathBuf::from("/var/lib/entropy/main/packages.db.md5"));
        assert_eq!(
            repo.revision_file(),
            PathBuf::from("/var/lib/entropy/main/packages.db.revision")
        );
        assert_eq!(repo.artifact_file(), PathBuf::from("/var/lib/entropy/main/packages.db.bz2"));
        assert_eq!(repo.staging_dir(), PathBuf::from("/var/lib/entropy/main/.staging"));
    }

    #[test]
    fn test_remote_url_trims_trailing_slash() {
        let repo = RepositoryDescriptor::new("main", "https://mirror.example/main/", "/tmp/main");
        assert_eq!(
            repo.remote_url(REVISION_FILE),
            "https://mirror.example/main/packages.db.revision"
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let repo: RepositoryDescriptor = toml::from_str(
            r#"
            id = "main"
            database_url = "https://mirror.example/main"
            compression_format = "zst"
            "#,
        )
        .unwrap();

        assert_eq!(repo.compression_format, CompressionFormat::Zstd);
        assert!(repo.package_mirrors.is_empty());
        assert!(repo.local_db_path.as_os_str().is_empty());
        assert_eq!(repo.artifact_name(), "packages.db.zst");
    }

    #[test]
    fn test_deserialize_unknown_format_fails() {
        let result: std::result::Result<RepositoryDescriptor, _> = toml::from_str(
            r#"
            id = "main"
            database_url = "https://mirror.example/main"
            compression_format = "rar"
            "#,
        );
        assert!(result.is_err());
    }
}
