// src/config_files/marker.rs

//! Pending update marker names and backup names
//!
//! A pending replacement for `/etc/foo/name` is staged as
//! `/etc/foo/._cfg####_name`, where `####` is any four characters that parse
//! as an integer and the fifth character after the prefix is `_`.

use std::fs;
use std::path::{Path, PathBuf};

/// File name prefix of pending update markers
pub const MARKER_PREFIX: &str = "._cfg";

/// File name prefix of configuration file backups
pub const BACKUP_PREFIX: &str = "._entropy_backup";

const TAG_LEN: usize = 4;

/// Parts of a marker file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerName {
    /// The four-character revision tag
    pub revision_tag: String,
    /// Basename of the file the marker would replace
    pub destination_name: String,
}

/// Split a marker file name into tag and destination name
///
/// Returns `None` for names that do not follow the convention.
///
/// ```
/// use entropy::config_files::parse_marker;
///
/// let marker = parse_marker("._cfg0001_make.conf").unwrap();
/// assert_eq!(marker.revision_tag, "0001");
/// assert_eq!(marker.destination_name, "make.conf");
/// assert!(parse_marker("._cfgabcd_make.conf").is_none());
/// ```
pub fn parse_marker(file_name: &str) -> Option<MarkerName> {
    let rest = file_name.strip_prefix(MARKER_PREFIX)?;
    let tag = rest.get(..TAG_LEN)?;
    tag.parse::<i32>().ok()?;

    let destination_name = rest.get(TAG_LEN..)?.strip_prefix('_')?;
    if destination_name.is_empty() {
        return None;
    }

    Some(MarkerName {
        revision_tag: tag.to_string(),
        destination_name: destination_name.to_string(),
    })
}

/// Live file a marker path would replace
pub fn destination_for(marker_path: &Path) -> Option<(String, PathBuf)> {
    let file_name = marker_path.file_name()?.to_str()?;
    let marker = parse_marker(file_name)?;
    Some((
        marker.revision_tag,
        marker_path.with_file_name(marker.destination_name),
    ))
}

/// First free backup path for `destination`
///
/// Backups are named `._entropy_backup.<n>_<basename>` next to the file, with
/// `n` counting up from 0 until the name is unused (dangling symlinks count as
/// used).
pub fn backup_path(destination: &Path) -> Option<PathBuf> {
    let base_name = destination.file_name()?.to_string_lossy().into_owned();
    let mut counter: u64 = 0;
    loop {
        let candidate =
            destination.with_file_name(format!("{}.{}_{}", BACKUP_PREFIX, counter, base_name));
        if fs::symlink_metadata(&candidate).is_err() {
            return Some(candidate);
        }
        counter += 1;
    }
}
