// tests/repository_sync.rs

//! Integration tests for repository synchronization against `file://` mirrors.

mod common;

use common::{file_url, md5_hex, write_file, TestHost};
use entropy::repository::{
    last_successful_sync, read_revision, repositories_are_old, PostSyncHook, RepositoryStatus,
};
use entropy::{
    CacheStore, LockRegistry, RepositorySyncEngine, ResourceLock, Settings, SyncStatus,
    UriFetcher,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

struct CountingHook {
    calls: Arc<AtomicUsize>,
    updated: Arc<std::sync::Mutex<Vec<String>>>,
}

impl PostSyncHook for CountingHook {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&self, updated: &[String]) -> entropy::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.updated.lock().unwrap().extend(updated.iter().cloned());
        Ok(())
    }
}

struct FailingHook;

impl PostSyncHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    fn run(&self, _updated: &[String]) -> entropy::Result<()> {
        Err(entropy::Error::IoError("reconciliation backend unavailable".to_string()))
    }
}

fn sync(settings: &Settings, ids: &[&str]) -> entropy::SyncReport {
    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let mut engine =
        RepositorySyncEngine::new(settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    engine.sync(&ids, false, true).unwrap()
}

#[test]
fn test_update_to_new_revision() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    let repo = settings.repository("main").unwrap().clone();

    host.publish("main", 42, b"");
    let report = sync(&settings, &[]);
    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(read_revision(&repo), Some(42));

    host.publish("main", 43, b"revision 43 contents");
    let report = sync(&settings, &["main"]);

    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.exit_code(), 0);
    let outcome = report.outcome("main").unwrap();
    assert_eq!(outcome.status, RepositoryStatus::Updated);
    assert_eq!(outcome.old_revision, Some(42));
    assert_eq!(outcome.new_revision, Some(43));

    assert_eq!(fs::read(repo.database_file()).unwrap(), b"revision 43 contents");
    assert_eq!(read_revision(&repo), Some(43));
    assert!(repo.artifact_file().exists());
    assert!(fs::read_to_string(repo.checksum_file())
        .unwrap()
        .starts_with(&md5_hex(b"revision 43 contents")));
    assert!(!repo.staging_dir().exists());
}

#[test]
fn test_empty_database_checksum() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish_with_checksum("main", 1, b"", EMPTY_MD5);

    let report = sync(&settings, &["main"]);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::Updated);
}

#[test]
fn test_up_to_date_takes_no_lock_and_runs_no_hooks() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    let repo = settings.repository("main").unwrap().clone();

    host.publish("main", 42, b"db");
    write_file(&repo.revision_file(), "42\n");
    write_file(&repo.database_file(), "local db");

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    engine.add_hook(Box::new(CountingHook {
        calls: Arc::clone(&calls),
        updated: Arc::default(),
    }));

    let report = engine.sync(&[], false, true).unwrap();

    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::UpToDate);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!settings.lock_path().exists());
    assert_eq!(fs::read_to_string(repo.database_file()).unwrap(), "local db");
}

#[test]
fn test_force_redownloads_same_revision() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    let repo = settings.repository("main").unwrap().clone();

    host.publish("main", 42, b"db");
    write_file(&repo.revision_file(), "42\n");

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    let report = engine.sync(&[], true, true).unwrap();

    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::Updated);
    assert_eq!(fs::read(repo.database_file()).unwrap(), b"db");
}

#[test]
fn test_checksum_mismatch_is_isolated() {
    let host = TestHost::new();
    let settings = host.settings(&["good", "bad"]);
    let bad = settings.repository("bad").unwrap().clone();

    write_file(&bad.revision_file(), "7\n");
    write_file(&bad.database_file(), "old bad db");

    host.publish("good", 10, b"good db");
    host.publish_with_checksum("bad", 8, b"tampered db", EMPTY_MD5);

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let updated = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    engine.add_hook(Box::new(CountingHook {
        calls: Arc::new(AtomicUsize::new(0)),
        updated: Arc::clone(&updated),
    }));
    let report = engine.sync(&[], false, true).unwrap();

    assert_eq!(report.status, SyncStatus::SyncErrors);
    assert_eq!(report.exit_code(), 128);
    assert_eq!(report.outcome("good").unwrap().status, RepositoryStatus::Updated);
    assert_eq!(report.outcome("bad").unwrap().status, RepositoryStatus::Failed);
    assert_eq!(*updated.lock().unwrap(), vec!["good".to_string()]);

    // The live snapshot of the failed repository is untouched
    assert_eq!(read_revision(&bad), Some(7));
    assert_eq!(fs::read_to_string(bad.database_file()).unwrap(), "old bad db");
    assert!(!bad.staging_dir().exists());
    assert!(!settings.last_sync_path().exists());
}

#[test]
fn test_missing_revision_keeps_live_snapshot() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    let repo = settings.repository("main").unwrap().clone();

    write_file(&repo.revision_file(), "5\n");
    write_file(&repo.database_file(), "live");
    host.publish("main", 6, b"next");
    fs::remove_file(host.remote_dir("main").join("packages.db.revision")).unwrap();

    let report = sync(&settings, &["main"]);

    assert_eq!(report.status, SyncStatus::NotAvailable);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::NotAvailable);
    assert_eq!(read_revision(&repo), Some(5));
    assert_eq!(fs::read_to_string(repo.database_file()).unwrap(), "live");
}

#[test]
fn test_missing_artifact_is_not_available() {
    let host = TestHost::new();
    let settings = host.settings(&["main", "extra"]);
    host.publish("main", 1, b"db");
    host.publish("extra", 1, b"db");
    fs::remove_file(host.remote_dir("extra").join("packages.db.bz2")).unwrap();

    let report = sync(&settings, &[]);

    assert_eq!(report.status, SyncStatus::PartiallySynced);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.outcome("extra").unwrap().status, RepositoryStatus::NotAvailable);
}

#[test]
fn test_remote_download_lock() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 3, b"db");
    fs::write(host.remote_dir("main").join("packages.db.download.lock"), "").unwrap();

    let report = sync(&settings, &["main"]);

    assert_eq!(report.status, SyncStatus::NotAvailable);
    assert_eq!(report.exit_code(), 2);
    assert!(read_revision(settings.repository("main").unwrap()).is_none());
}

#[test]
fn test_locked_by_another_holder() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 3, b"db");

    let mut other = ResourceLock::new(settings.lock_path(), Arc::new(LockRegistry::new()));
    assert!(other.try_acquire_exclusive().unwrap());

    let report = sync(&settings, &["main"]);
    assert_eq!(report.status, SyncStatus::Locked);
    assert_eq!(report.exit_code(), 4);
    assert!(read_revision(settings.repository("main").unwrap()).is_none());

    other.release().unwrap();
    let report = sync(&settings, &["main"]);
    assert_eq!(report.status, SyncStatus::Synced);
}

#[test]
fn test_lock_released_after_run() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 3, b"db");

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    engine.sync(&[], false, true).unwrap();
    assert!(!engine.lock().is_already_acquired());

    let mut other = ResourceLock::new(settings.lock_path(), Arc::new(LockRegistry::new()));
    assert!(other.try_acquire_exclusive().unwrap());
}

#[test]
fn test_offline() {
    let host = TestHost::new();
    let mut settings = host.settings(&["main"]);
    host.publish("main", 3, b"db");
    settings.reachability_url = Some(file_url(&host.path().join("no-network")));

    let report = sync(&settings, &[]);
    assert_eq!(report.status, SyncStatus::Offline);
    assert_eq!(report.exit_code(), 2);
    assert!(report.outcomes.is_empty());
    assert!(!settings.lock_path().exists());
}

#[test]
fn test_unknown_repository() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);

    let report = sync(&settings, &["nope"]);
    assert_eq!(report.outcome("nope").unwrap().status, RepositoryStatus::NotAvailable);
    assert_eq!(report.status, SyncStatus::NotAvailable);
}

#[test]
fn test_no_repositories() {
    let host = TestHost::new();
    let settings = host.settings(&[]);

    let report = sync(&settings, &[]);
    assert_eq!(report.status, SyncStatus::NoRepositories);
    assert_eq!(report.exit_code(), 127);
}

#[test]
fn test_post_update_script_arguments() {
    let host = TestHost::new();
    let mut settings = host.settings(&["main"]);
    let output = host.path().join("script.out");
    let script = host.path().join("post-update.sh");
    fs::write(
        &script,
        format!("echo \"$1 $2 $3\" > {}\n", output.display()),
    )
    .unwrap();
    settings.repositories[0].post_update_script = Some(script);
    host.publish("main", 9, b"db");

    let report = sync(&settings, &["main"]);
    assert_eq!(report.status, SyncStatus::Synced);

    let args = fs::read_to_string(&output).unwrap();
    assert_eq!(args.trim(), format!("main {}/ 5", host.root().display()));
}

#[test]
fn test_last_sync_written_on_success() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 2, b"db");

    sync(&settings, &[]);
    let stamp = fs::read_to_string(settings.last_sync_path()).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp.trim()).is_ok());
}

#[test]
fn test_repository_caches_invalidated() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 2, b"db");

    let cache = CacheStore::new(settings.cache_dir());
    cache.push("repository/main/atom_match", &vec![1u32, 2, 3]).unwrap();

    sync(&settings, &[]);
    assert_eq!(cache.pop::<Vec<u32>>("repository/main/atom_match"), None);
}

#[test]
fn test_last_sync_readable_after_success() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 2, b"db");

    assert!(last_successful_sync(&settings).is_none());
    assert!(repositories_are_old(&settings, chrono::Utc::now()));

    sync(&settings, &[]);
    let last = last_successful_sync(&settings).unwrap();
    assert!((chrono::Utc::now() - last).num_seconds().abs() < 60);
    assert!(!repositories_are_old(&settings, chrono::Utc::now()));
}

#[test]
fn test_failing_hook_keeps_exit_code() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 4, b"db");

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()));
    engine.add_hook(Box::new(FailingHook));
    engine.add_hook(Box::new(CountingHook {
        calls: Arc::clone(&calls),
        updated: Arc::default(),
    }));

    let report = engine.sync(&[], false, true).unwrap();

    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::Updated);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(settings.last_sync_path().exists());
}

#[test]
fn test_unwritable_repository_is_permission_denied() {
    let host = TestHost::new();
    let settings = host.settings(&["main", "extra"]);
    let extra = settings.repository("extra").unwrap().clone();
    host.publish("main", 1, b"db");
    host.publish("extra", 1, b"db");

    fs::create_dir_all(&extra.local_db_path).unwrap();
    fs::set_permissions(&extra.local_db_path, fs::Permissions::from_mode(0o555)).unwrap();
    if fs::write(extra.local_db_path.join("writable"), "").is_ok() {
        eprintln!("Skipping test: running as root bypasses permission checks");
        return;
    }

    let report = sync(&settings, &[]);
    fs::set_permissions(&extra.local_db_path, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.status, SyncStatus::SyncErrors);
    assert_eq!(report.exit_code(), 128);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::Updated);
    assert_eq!(
        report.outcome("extra").unwrap().status,
        RepositoryStatus::PermissionDenied
    );
    assert!(read_revision(&extra).is_none());
}

#[test]
fn test_wait_for_lock_waits_for_release() {
    let host = TestHost::new();
    let settings = host.settings(&["main"]);
    host.publish("main", 3, b"db");

    let mut other = ResourceLock::new(settings.lock_path(), Arc::new(LockRegistry::new()));
    assert!(other.try_acquire_exclusive().unwrap());
    let started = Instant::now();
    let holder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        other.release().unwrap();
    });

    let fetcher = UriFetcher::new().unwrap();
    let cache = CacheStore::new(settings.cache_dir());
    let mut engine =
        RepositorySyncEngine::new(&settings, &fetcher, &cache, Arc::new(LockRegistry::new()))
            .wait_for_lock(true);

    let report = engine.sync(&[], false, true).unwrap();
    holder.join().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.outcome("main").unwrap().status, RepositoryStatus::Updated);
    assert_eq!(read_revision(settings.repository("main").unwrap()), Some(3));
}
