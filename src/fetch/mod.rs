// src/fetch/mod.rs

//! Retrieving repository objects from remote URIs
//!
//! The sync engine talks to remotes only through [`FetchClient`]. The default
//! implementation, [`UriFetcher`], dispatches on the URL scheme:
//!
//! - `http`/`https`: blocking reqwest client with timeout and retry
//! - `file`: local filesystem copy, used for local mirrors and tests
//!
//! Anything else fails with a [`FetchOutcome::Failed`] outcome.

mod http;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use http::HttpTransport;

/// Result of a single download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The object was written to the destination
    Fetched { bytes: u64 },
    /// Nothing was written to the destination
    Failed { reason: String },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }
}

/// Capability to retrieve bytes from a URI
pub trait FetchClient {
    /// Download `url` into `dest`
    ///
    /// Data is written to a temporary sibling and renamed onto `dest` only
    /// once complete; a failed fetch never leaves a partial `dest` behind.
    fn fetch(&self, url: &str, dest: &Path) -> FetchOutcome;

    /// Download a small object into memory
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Lightweight probe used to detect that the network is down
    fn is_reachable(&self, url: &str) -> bool;
}

/// Temporary sibling used while `dest` is being written
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    dest.with_file_name(name)
}

fn local_path(url: &Url) -> Result<PathBuf> {
    url.to_file_path()
        .map_err(|_| Error::DownloadError(format!("Invalid file URL: {}", url)))
}

/// [`FetchClient`] dispatching on URL scheme
pub struct UriFetcher {
    http: HttpTransport,
    show_progress: bool,
}

impl UriFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpTransport::new()?,
            show_progress: false,
        })
    }

    /// Show a progress bar for HTTP downloads
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::DownloadError(format!("Invalid URL {}: {}", url, e)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = partial_path(dest);

        let result = match parsed.scheme() {
            "http" | "https" => File::create(&temp_path)
                .map_err(Error::from)
                .and_then(|mut file| {
                    let written = self.http.download_into(url, &mut file, self.show_progress)?;
                    file.sync_all()?;
                    Ok(written)
                }),
            "file" => {
                let source = local_path(&parsed)?;
                fs::copy(&source, &temp_path).map_err(|e| {
                    Error::DownloadError(format!("Failed to fetch {}: {}", source.display(), e))
                })
            }
            scheme => Err(Error::DownloadError(format!(
                "Unsupported URL scheme '{}' in {}",
                scheme, url
            ))),
        };

        match result {
            Ok(written) => {
                fs::rename(&temp_path, dest).map_err(|e| {
                    let _ = fs::remove_file(&temp_path);
                    Error::IoError(format!(
                        "Failed to move {} to {}: {e}",
                        temp_path.display(),
                        dest.display()
                    ))
                })?;
                Ok(written)
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&temp_path) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        debug!("Failed to remove {}: {}", temp_path.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }
}

impl FetchClient for UriFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> FetchOutcome {
        match self.download(url, dest) {
            Ok(bytes) => {
                debug!("Fetched {} ({} bytes)", url, bytes);
                FetchOutcome::Fetched { bytes }
            }
            Err(e) => {
                debug!("Fetch of {} failed: {}", url, e);
                FetchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::DownloadError(format!("Invalid URL {}: {}", url, e)))?;
        match parsed.scheme() {
            "http" | "https" => self.http.download_to_bytes(url),
            "file" => {
                let path = local_path(&parsed)?;
                fs::read(&path).map_err(|e| {
                    Error::DownloadError(format!("Failed to read {}: {}", path.display(), e))
                })
            }
            scheme => Err(Error::DownloadError(format!(
                "Unsupported URL scheme '{}' in {}",
                scheme, url
            ))),
        }
    }

    fn is_reachable(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => self.http.probe(url),
                "file" => local_path(&parsed).map(|p| p.exists()).unwrap_or(false),
                _ => false,
            },
            Err(_) => false,
        }
    }
}
