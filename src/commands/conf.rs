// src/commands/conf.rs

//! Configuration file update commands
//!
//! `conf info` lists pending updates, `conf update` merges the trivial ones and
//! then walks the administrator through the rest on the terminal.

use super::open_cache;
use anyhow::Result;
use chrono::Utc;
use entropy::config_files::{
    resolve_interactive, ActionChoice, BatchAction, FileChoice, Prompter,
};
use entropy::repository::{repositories_are_old, REPOSITORY_OLD_DAYS};
use entropy::Result as EntropyResult;
use entropy::{ConfigReconciler, ConfigUpdateCandidate, ScanCache, Settings};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::Command;
use tracing::info;

const EDITOR_FALLBACKS: &[&str] = &["/bin/nano", "/bin/vi", "/usr/bin/vi"];

fn print_scan(scan: &ScanCache) {
    for (key, candidate) in scan.iter() {
        let mode = if candidate.automerge { "auto" } else { "    " };
        println!(
            "  ({:>3}) [{}] {}",
            key,
            mode,
            candidate.destination_path.display()
        );
    }
}

/// List pending configuration file updates
pub fn cmd_conf_info(settings: &Settings) -> Result<i32> {
    let cache = open_cache(settings)?;
    let mut reconciler = ConfigReconciler::new(settings, &cache);
    let scan = reconciler.info()?;

    if repositories_are_old(settings, Utc::now()) {
        println!(
            "Repositories were not synchronized in the last {} days, run 'equo update'",
            REPOSITORY_OLD_DAYS
        );
    }

    if scan.is_empty() {
        println!("No configuration files to update");
    } else {
        println!("{} configuration files to update:", scan.len());
        print_scan(scan);
    }
    Ok(0)
}

/// Merge trivial updates, then resolve the rest interactively
pub fn cmd_conf_update(settings: &Settings, auto_only: bool) -> Result<i32> {
    let cache = open_cache(settings)?;
    let mut reconciler = ConfigReconciler::new(settings, &cache);
    reconciler.scan(false)?;

    let merged = reconciler.resolve_auto(false)?;
    if merged > 0 {
        println!("Automatically merged {} configuration files", merged);
    }
    if auto_only {
        return Ok(0);
    }

    let mut prompter = TerminalPrompter::new();
    let summary = resolve_interactive(&mut reconciler, &mut prompter)?;
    info!(
        "Interactive session: {} merged, {} discarded, {} skipped",
        summary.merged, summary.discarded, summary.skipped
    );
    println!(
        "{} merged, {} discarded, {} left for later",
        summary.merged + merged,
        summary.discarded,
        reconciler.scan(true)?.len()
    );
    Ok(0)
}

/// [`Prompter`] reading numbered answers from stdin
struct TerminalPrompter {
    stdin: io::Stdin,
}

impl TerminalPrompter {
    fn new() -> Self {
        Self { stdin: io::stdin() }
    }

    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        print!("{} ", prompt);
        io::stdout().flush()?;
        let mut line = String::new();
        if self.stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn ask_number(&mut self, prompt: &str) -> io::Result<Option<i64>> {
        loop {
            match self.ask(prompt)? {
                None => return Ok(None),
                Some(answer) => match answer.parse::<i64>() {
                    Ok(n) => return Ok(Some(n)),
                    Err(_) => println!("Please type a number"),
                },
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn choose_file(&mut self, scan: &ScanCache) -> EntropyResult<FileChoice> {
        println!("Pending configuration file updates:");
        print_scan(scan);
        println!("  (-1) Exit");
        println!("  (-3) Merge all, asking for each file");
        println!("  (-5) Merge all without asking");
        println!("  (-7) Discard all, asking for each file");
        println!("  (-9) Discard all without asking");

        loop {
            let choice = match self.ask_number("Your choice:")? {
                None | Some(-1) => FileChoice::Exit,
                Some(-3) => FileChoice::Batch(BatchAction::MergeAll { confirm: true }),
                Some(-5) => FileChoice::Batch(BatchAction::MergeAll { confirm: false }),
                Some(-7) => FileChoice::Batch(BatchAction::DiscardAll { confirm: true }),
                Some(-9) => FileChoice::Batch(BatchAction::DiscardAll { confirm: false }),
                Some(n) => match u32::try_from(n) {
                    Ok(key) if scan.get(key).is_some() => FileChoice::Select(key),
                    _ => {
                        println!("Invalid choice");
                        continue;
                    }
                },
            };
            return Ok(choice);
        }
    }

    fn choose_action(
        &mut self,
        key: u32,
        candidate: &ConfigUpdateCandidate,
    ) -> EntropyResult<ActionChoice> {
        println!("({}) {}:", key, candidate.destination_path.display());
        println!("  (1) Replace the current file with the update");
        println!("  (2) Delete the update, keep the current file");
        println!("  (3) Edit the update");
        println!("  (4) Show the differences again");
        println!("  (-1) Back to the list");

        loop {
            let action = match self.ask_number("Your choice:")? {
                None | Some(-1) => ActionChoice::Back,
                Some(1) => ActionChoice::Replace,
                Some(2) => ActionChoice::DeleteUpdate,
                Some(3) => ActionChoice::Edit,
                Some(4) => ActionChoice::ShowDiff,
                Some(_) => {
                    println!("Invalid choice");
                    continue;
                }
            };
            return Ok(action);
        }
    }

    fn confirm(&mut self, question: &str) -> EntropyResult<bool> {
        let answer = self.ask(&format!("{} [y/N]", question))?;
        Ok(matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes")))
    }

    fn edit(&mut self, path: &Path) -> EntropyResult<()> {
        let editor = std::env::var("EDITOR")
            .ok()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| {
                EDITOR_FALLBACKS
                    .iter()
                    .find(|p| Path::new(p).exists())
                    .map(|p| p.to_string())
            })
            .ok_or_else(|| {
                entropy::Error::NotFoundError("No editor found, set $EDITOR".to_string())
            })?;

        let status = Command::new(&editor).arg(path).status()?;
        if !status.success() {
            println!("{} exited with {}", editor, status);
        }
        Ok(())
    }

    fn show_diff(
        &mut self,
        _key: u32,
        _candidate: &ConfigUpdateCandidate,
        diff: &str,
    ) -> EntropyResult<()> {
        println!("{}", diff);
        Ok(())
    }
}
