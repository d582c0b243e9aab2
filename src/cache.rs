// src/cache.rs

//! On-disk cache store
//!
//! An opaque object store keyed by string identifiers of the form
//! `namespace/name` (nested namespaces are allowed). Values are encoded as
//! CBOR and written atomically, so a reader sees either the previous entry or
//! the new one. A missing, truncated or undecodable entry is reported as
//! absent; callers rebuild whatever they were caching.

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

const ENTRY_EXTENSION: &str = "cbor";

/// Cache namespace holding everything derived from a repository's content
pub fn repository_namespace(repository_id: &str) -> String {
    format!("repository/{}", repository_id)
}

/// Directory-backed binary object store
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Self::relative_key(key)?;
        let mut path = self.root.join(relative);
        let file_name = format!(
            "{}.{}",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            ENTRY_EXTENSION
        );
        path.set_file_name(file_name);
        Ok(path)
    }

    fn relative_key(key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if valid {
            Ok(relative.to_path_buf())
        } else {
            Err(Error::ParseError(format!("Invalid cache key '{}'", key)))
        }
    }

    /// Store a value under `key`, replacing any previous entry
    pub fn push<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.entry_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::IoError(format!("Cache entry {} has no parent", path.display())))?;
        fs::create_dir_all(parent)?;

        let mut encoded = Vec::new();
        ciborium::into_writer(value, &mut encoded)
            .map_err(|e| Error::ParseError(format!("Failed to encode cache entry {}: {}", key, e)))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&encoded)?;
        temp.as_file().sync_all()?;
        temp.persist(&path)
            .map_err(|e| Error::IoError(format!("Failed to store cache entry {}: {}", key, e)))?;

        debug!("Stored cache entry {}", key);
        Ok(())
    }

    /// Load the value stored under `key`
    ///
    /// Missing and undecodable entries both yield `None`.
    pub fn pop<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key).ok()?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                debug!("Cache entry {} unreadable: {}", key, e);
                return None;
            }
        };

        match ciborium::from_reader(BufReader::new(file)) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Cache entry {} is corrupt: {}", key, e);
                None
            }
        }
    }

    /// Delete the entry stored under `key`, if any
    pub fn discard(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Discarded cache entry {}", key);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every entry under a namespace
    pub fn discard_namespace(&self, namespace: &str) -> Result<()> {
        let dir = self.root.join(Self::relative_key(namespace)?);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Discarded cache namespace {}", namespace);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every entry in the store
    pub fn purge(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_push_pop() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        let mut value = BTreeMap::new();
        value.insert(1u32, "etc/._cfg0000_hosts".to_string());
        store.push("conf/scanfs", &value).unwrap();

        let loaded: BTreeMap<u32, String> = store.pop("conf/scanfs").unwrap();
        assert_eq!(loaded, value);
        assert!(temp_dir.path().join("conf/scanfs.cbor").exists());
    }

    #[test]
    fn test_missing_entry_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        assert!(store.pop::<Vec<String>>("conf/scanfs").is_none());
    }

    #[test]
    fn test_corrupt_entry_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        fs::create_dir_all(temp_dir.path().join("conf")).unwrap();
        fs::write(temp_dir.path().join("conf/scanfs.cbor"), b"\xff\x00garbage").unwrap();
        assert!(store.pop::<BTreeMap<u32, String>>("conf/scanfs").is_none());
    }

    #[test]
    fn test_discard_and_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let namespace = repository_namespace("main");

        store.push(&format!("{}/atom_match", namespace), &vec![1u8, 2, 3]).unwrap();
        store.push(&format!("{}/depends", namespace), &vec![4u8]).unwrap();
        store.push("conf/scanfs", &vec![5u8]).unwrap();

        store.discard(&format!("{}/depends", namespace)).unwrap();
        assert!(store.pop::<Vec<u8>>(&format!("{}/depends", namespace)).is_none());
        store.discard(&format!("{}/depends", namespace)).unwrap();

        store.discard_namespace(&namespace).unwrap();
        assert!(store.pop::<Vec<u8>>(&format!("{}/atom_match", namespace)).is_none());
        assert_eq!(store.pop::<Vec<u8>>("conf/scanfs"), Some(vec![5u8]));

        store.purge().unwrap();
        assert!(store.pop::<Vec<u8>>("conf/scanfs").is_none());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().join("caches"));

        assert!(store.push("../outside", &1u8).is_err());
        assert!(store.push("/etc/passwd", &1u8).is_err());
        assert!(store.push("", &1u8).is_err());
        assert!(store.discard_namespace("..").is_err());
    }
}
