// src/config_files/interactive.rs

//! Interactive resolution of pending configuration file updates
//!
//! The loop itself is independent of any terminal: all input and output goes
//! through a [`Prompter`], so the binary plugs in a stdin/stdout prompter and
//! tests plug in a scripted one.

use std::path::Path;
use tracing::{debug, warn};

use super::{ConfigReconciler, ConfigUpdateCandidate, ScanCache};
use crate::error::Result;

/// What to do with a whole list of pending updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    /// Replace every destination, asking per file when `confirm` is set
    MergeAll { confirm: bool },
    /// Drop every pending update, asking per file when `confirm` is set
    DiscardAll { confirm: bool },
}

/// Answer to "which file?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChoice {
    Exit,
    Select(u32),
    Batch(BatchAction),
}

/// Answer to "what to do with this file?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionChoice {
    /// Return to the file list
    Back,
    /// Overwrite the live file with the update
    Replace,
    /// Delete the update and keep the live file
    DeleteUpdate,
    /// Edit the update before deciding
    Edit,
    /// Show the diff again
    ShowDiff,
}

/// User interaction needed by [`resolve_interactive`]
pub trait Prompter {
    fn choose_file(&mut self, scan: &ScanCache) -> Result<FileChoice>;

    fn choose_action(&mut self, key: u32, candidate: &ConfigUpdateCandidate) -> Result<ActionChoice>;

    /// Yes/no question, used by batch actions that ask per file
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Let the user edit `path` (a host path) in place
    fn edit(&mut self, path: &Path) -> Result<()>;

    fn show_diff(&mut self, key: u32, candidate: &ConfigUpdateCandidate, diff: &str) -> Result<()>;
}

/// Counts of what an interactive session did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub merged: usize,
    pub discarded: usize,
    pub skipped: usize,
}

/// Run the interactive loop until the user exits or nothing is left
pub fn resolve_interactive(
    reconciler: &mut ConfigReconciler<'_>,
    prompter: &mut dyn Prompter,
) -> Result<ResolutionSummary> {
    let mut summary = ResolutionSummary::default();

    loop {
        let scan = reconciler.scan(true)?.clone();
        if scan.is_empty() {
            debug!("No pending configuration file updates left");
            break;
        }

        match prompter.choose_file(&scan)? {
            FileChoice::Exit => break,
            FileChoice::Batch(action) => run_batch(reconciler, prompter, &scan, action, &mut summary)?,
            FileChoice::Select(key) => {
                if scan.get(key).is_none() {
                    warn!("No pending configuration update {}", key);
                    continue;
                }
                resolve_one(reconciler, prompter, key, &mut summary)?;
            }
        }
    }

    Ok(summary)
}

fn run_batch(
    reconciler: &mut ConfigReconciler<'_>,
    prompter: &mut dyn Prompter,
    scan: &ScanCache,
    action: BatchAction,
    summary: &mut ResolutionSummary,
) -> Result<()> {
    let (merge, confirm) = match action {
        BatchAction::MergeAll { confirm } => (true, confirm),
        BatchAction::DiscardAll { confirm } => (false, confirm),
    };

    for (key, candidate) in scan.iter() {
        if std::fs::symlink_metadata(reconciler.root_path(&candidate.source_path)).is_err() {
            reconciler.forget(key);
            continue;
        }

        if confirm {
            let question = if merge {
                format!("Replace {}?", candidate.destination_path.display())
            } else {
                format!("Discard update for {}?", candidate.destination_path.display())
            };
            if !prompter.confirm(&question)? {
                summary.skipped += 1;
                continue;
            }
        }

        if merge {
            if reconciler.merge(key)? {
                summary.merged += 1;
            }
        } else {
            reconciler.discard(key)?;
            summary.discarded += 1;
        }
    }

    Ok(())
}

fn resolve_one(
    reconciler: &mut ConfigReconciler<'_>,
    prompter: &mut dyn Prompter,
    key: u32,
    summary: &mut ResolutionSummary,
) -> Result<()> {
    loop {
        let Some(candidate) = reconciler.get(key).cloned() else {
            return Ok(());
        };

        let diff = reconciler.diff(key)?;
        prompter.show_diff(key, &candidate, &diff)?;

        match prompter.choose_action(key, &candidate)? {
            ActionChoice::Back => return Ok(()),
            ActionChoice::Replace => {
                if reconciler.merge(key)? {
                    summary.merged += 1;
                }
                return Ok(());
            }
            ActionChoice::DeleteUpdate => {
                reconciler.discard(key)?;
                summary.discarded += 1;
                return Ok(());
            }
            ActionChoice::Edit => {
                prompter.edit(&reconciler.root_path(&candidate.source_path))?;
                if reconciler.rediff(key)? {
                    debug!("Update {} became trivial after editing, merging", key);
                    if reconciler.merge(key)? {
                        summary.merged += 1;
                    }
                    return Ok(());
                }
            }
            ActionChoice::ShowDiff => {}
        }
    }
}
