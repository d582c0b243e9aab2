// src/config_files/diff.rs

//! Deciding whether a pending update can be merged without review
//!
//! An update is trivial when its destination does not exist, or when every
//! line the update inserts or deletes is either blank (empty or whitespace
//! only) or an RCS header comment such as
//! `# $Header: /var/cvsroot/gentoo-x86/sys-apps/baselayout/files/hosts,v 1.2 $`.
//! Files that are not valid UTF-8 are only trivial when byte-identical.
//!
//! Symlinks are followed: a destination that is a dangling symlink counts as
//! missing, so the update is trivial. A destination that resolves to anything
//! other than a regular file (a directory, a device) is never trivial. Any
//! other I/O error makes the update non-trivial.

use diffy::{create_patch, Line};
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static RCS_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#.*\$Header(:[^$]*)?\$").unwrap());

fn is_ignorable_line(line: &str) -> bool {
    line.trim().is_empty() || RCS_HEADER_RE.is_match(line)
}

/// Whether the changes from `old` to `new` only touch ignorable lines
pub fn is_trivial_change(old: &str, new: &str) -> bool {
    if old == new {
        return true;
    }
    let patch = create_patch(old, new);
    patch
        .hunks()
        .iter()
        .flat_map(|hunk| hunk.lines())
        .all(|line| match line {
            Line::Context(_) => true,
            Line::Insert(text) | Line::Delete(text) => is_ignorable_line(text),
        })
}

/// Whether `source` may replace `destination` without user review
pub fn is_automergeable(source: &Path, destination: &Path) -> bool {
    match fs::metadata(destination) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
        Err(e) => {
            debug!("Cannot stat {}: {}", destination.display(), e);
            return false;
        }
        Ok(meta) if !meta.is_file() => {
            debug!("{} is not a regular file", destination.display());
            return false;
        }
        Ok(_) => {}
    }

    let (new, old) = match (fs::read(source), fs::read(destination)) {
        (Ok(new), Ok(old)) => (new, old),
        (Err(e), _) | (_, Err(e)) => {
            debug!(
                "Cannot compare {} with {}: {}",
                source.display(),
                destination.display(),
                e
            );
            return false;
        }
    };

    match (std::str::from_utf8(&old), std::str::from_utf8(&new)) {
        (Ok(old), Ok(new)) => is_trivial_change(old, new),
        _ => old == new,
    }
}

/// Unified diff from `destination` to `source` for display
///
/// A missing destination renders as an all-insert diff.
pub fn unified_diff(source: &Path, destination: &Path) -> io::Result<String> {
    let new = fs::read(source)?;
    let old = match fs::read(destination) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e),
    };

    let old = String::from_utf8_lossy(&old);
    let new = String::from_utf8_lossy(&new);
    let patch = create_patch(&old, &new);
    Ok(format!(
        "--- {}\n+++ {}\n{}",
        destination.display(),
        source.display(),
        patch
            .to_string()
            .lines()
            .skip_while(|line| line.starts_with("---") || line.starts_with("+++"))
            .map(|line| format!("{}\n", line))
            .collect::<String>()
    ))
}
