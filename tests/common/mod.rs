// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Remotes are plain directories reached through `file://` URLs, laid out the
//! way a mirror publishes a repository database.

#![allow(dead_code)]

use bzip2::write::BzEncoder;
use bzip2::Compression;
use entropy::hash::{hash_reader, HashAlgorithm};
use entropy::Settings;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use url::Url;

/// A temporary host with a work directory, a system root and remote mirrors
pub struct TestHost {
    pub temp_dir: TempDir,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.path().join("work")
    }

    pub fn root(&self) -> PathBuf {
        self.path().join("root")
    }

    /// Directory served as the remote for `repository_id`
    pub fn remote_dir(&self, repository_id: &str) -> PathBuf {
        self.path().join("mirror").join(repository_id)
    }

    pub fn remote_url(&self, repository_id: &str) -> String {
        file_url(&self.remote_dir(repository_id))
    }

    /// Settings with one repository per id, each backed by its mirror directory
    pub fn settings(&self, repository_ids: &[&str]) -> Settings {
        let mut toml = format!(
            "root = \"{}\"\nwork_dir = \"{}\"\n",
            self.root().display(),
            self.work_dir().display()
        );
        for id in repository_ids {
            fs::create_dir_all(self.remote_dir(id)).unwrap();
            toml.push_str(&format!(
                "\n[[repository]]\nid = \"{}\"\ndatabase_url = \"{}\"\n",
                id,
                self.remote_url(id)
            ));
        }
        Settings::from_toml(&toml).unwrap()
    }

    /// Publish a database snapshot on the mirror of `repository_id`
    pub fn publish(&self, repository_id: &str, revision: u64, database: &[u8]) {
        let checksum = md5_hex(database);
        self.publish_with_checksum(repository_id, revision, database, &checksum);
    }

    /// Publish a snapshot whose checksum file says `checksum`
    pub fn publish_with_checksum(
        &self,
        repository_id: &str,
        revision: u64,
        database: &[u8],
        checksum: &str,
    ) {
        let remote = self.remote_dir(repository_id);
        fs::create_dir_all(&remote).unwrap();
        fs::write(remote.join("packages.db.bz2"), bzip2_bytes(database)).unwrap();
        fs::write(
            remote.join("packages.db.md5"),
            format!("{}  packages.db\n", checksum),
        )
        .unwrap();
        fs::write(remote.join("packages.db.revision"), format!("{}\n", revision)).unwrap();
    }
}

pub fn file_url(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

pub fn md5_hex(data: &[u8]) -> String {
    hash_reader(HashAlgorithm::Md5, &mut &data[..]).unwrap()
}

pub fn bzip2_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Write `content` to `path`, creating parent directories
pub fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
