// src/lock.rs

//! Re-entrant shared/exclusive resource locks
//!
//! A [`ResourceLock`] is one logical holder of a named resource (a lock file
//! path). It layers a re-entrancy counter on top of an OS advisory lock
//! (`flock` via `fs2`), so it serializes independent processes as well as
//! threads: every holder opens its own file description, and `flock` treats
//! separate descriptions as separate owners even inside one process.
//!
//! The [`LockRegistry`] is shared by all holders created by one client. It
//! tracks how many in-process holders own each path and runs the post-acquire
//! hooks registered for a path whenever it goes from unheld to held.
//!
//! # Example
//!
//! ```no_run
//! use entropy::lock::{LockRegistry, ResourceLock};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(LockRegistry::new());
//! let mut lock = ResourceLock::new("/var/lib/entropy/.using_resources", registry);
//!
//! if lock.try_acquire_exclusive()? {
//!     // ... mutate repository directories ...
//!     lock.release()?;
//! }
//! # Ok::<(), entropy::Error>(())
//! ```

use fs2::FileExt;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Delay between attempts in the `wait_*` family
const WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Mode in which a resource is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Handle returned when registering a post-acquire hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type PostAcquireHook = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    holders: HashMap<PathBuf, usize>,
    hooks: Vec<(HookId, PathBuf, PostAcquireHook)>,
    next_hook: u64,
}

/// In-process bookkeeping shared by every [`ResourceLock`] of a client
#[derive(Default)]
pub struct LockRegistry {
    state: Mutex<RegistryState>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback run every time `path` goes from unheld to held
    ///
    /// Hooks run in registration order, on the thread that acquired the lock.
    pub fn add_post_acquire_hook<F>(&self, path: impl Into<PathBuf>, hook: F) -> HookId
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let mut state = self.state();
        let id = HookId(state.next_hook);
        state.next_hook += 1;
        state.hooks.push((id, path.into(), Arc::new(hook)));
        id
    }

    /// Remove a previously registered hook, returning whether it existed
    pub fn remove_post_acquire_hook(&self, id: HookId) -> bool {
        let mut state = self.state();
        let before = state.hooks.len();
        state.hooks.retain(|(hook_id, _, _)| *hook_id != id);
        state.hooks.len() != before
    }

    /// Number of in-process holders currently owning `path`
    pub fn holders(&self, path: &Path) -> usize {
        self.state().holders.get(path).copied().unwrap_or(0)
    }

    /// Record a new holder, returning the hooks to run if the path was unheld
    fn note_acquired(&self, path: &Path) -> Vec<PostAcquireHook> {
        let mut state = self.state();
        let holders = state.holders.entry(path.to_path_buf()).or_insert(0);
        *holders += 1;
        if *holders > 1 {
            return Vec::new();
        }
        state
            .hooks
            .iter()
            .filter(|(_, hook_path, _)| hook_path == path)
            .map(|(_, _, hook)| Arc::clone(hook))
            .collect()
    }

    fn note_released(&self, path: &Path) {
        let mut state = self.state();
        if let Some(holders) = state.holders.get_mut(path) {
            *holders = holders.saturating_sub(1);
            if *holders == 0 {
                state.holders.remove(path);
            }
        }
    }
}

/// One logical holder of a lock file
pub struct ResourceLock {
    path: PathBuf,
    registry: Arc<LockRegistry>,
    count: usize,
    mode: Option<LockMode>,
    file: Option<File>,
}

impl ResourceLock {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<LockRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
            count: 0,
            mode: None,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode currently held, if any
    pub fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    /// Re-entrancy depth
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether this holder currently holds the lock in any mode
    pub fn is_already_acquired(&self) -> bool {
        self.count > 0
    }

    /// Acquire exclusively without blocking; `Ok(false)` if someone else holds it
    pub fn try_acquire_exclusive(&mut self) -> Result<bool> {
        self.acquire(LockMode::Exclusive, false)
    }

    /// Acquire shared without blocking; `Ok(false)` if held exclusively elsewhere
    pub fn try_acquire_shared(&mut self) -> Result<bool> {
        self.acquire(LockMode::Shared, false)
    }

    /// Acquire exclusively, blocking in the kernel until available
    pub fn acquire_exclusive(&mut self) -> Result<()> {
        self.acquire(LockMode::Exclusive, true).map(|_| ())
    }

    /// Acquire shared, blocking in the kernel until available
    pub fn acquire_shared(&mut self) -> Result<()> {
        self.acquire(LockMode::Shared, true).map(|_| ())
    }

    /// Acquire exclusively, polling until available
    ///
    /// Logs once when the resource is busy, then retries with a short sleep.
    /// There is no timeout.
    pub fn wait_exclusive(&mut self) -> Result<()> {
        self.wait(LockMode::Exclusive)
    }

    /// Acquire shared, polling until available
    pub fn wait_shared(&mut self) -> Result<()> {
        self.wait(LockMode::Shared)
    }

    fn wait(&mut self, mode: LockMode) -> Result<()> {
        if self.acquire(mode, false)? {
            return Ok(());
        }
        warn!(
            "Resources at {} are locked by another process, waiting for {} access",
            self.path.display(),
            mode
        );
        loop {
            thread::sleep(WAIT_INTERVAL);
            if self.acquire(mode, false)? {
                return Ok(());
            }
        }
    }

    fn acquire(&mut self, mode: LockMode, blocking: bool) -> Result<bool> {
        if let Some(held) = self.mode {
            if held == LockMode::Shared && mode == LockMode::Exclusive {
                return Err(Error::LockUsage(format!(
                    "cannot acquire {} exclusively while holding it shared",
                    self.path.display()
                )));
            }
            self.count += 1;
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| {
                Error::IoError(format!("Failed to open lock file {}: {}", self.path.display(), e))
            })?;

        // std::fs::File grew inherent locking methods with different
        // signatures; call the fs2 ones explicitly.
        let result = match (mode, blocking) {
            (LockMode::Exclusive, true) => FileExt::lock_exclusive(&file),
            (LockMode::Exclusive, false) => FileExt::try_lock_exclusive(&file),
            (LockMode::Shared, true) => FileExt::lock_shared(&file),
            (LockMode::Shared, false) => FileExt::try_lock_shared(&file),
        };

        match result {
            Ok(()) => {}
            Err(e) if !blocking && e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Lock {} is busy ({} requested)", self.path.display(), mode);
                return Ok(false);
            }
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to acquire {} lock on {}: {}",
                    mode,
                    self.path.display(),
                    e
                )));
            }
        }

        debug!("Acquired {} lock on {}", mode, self.path.display());
        self.file = Some(file);
        self.mode = Some(mode);
        self.count = 1;

        for hook in self.registry.note_acquired(&self.path) {
            hook(&self.path);
        }
        Ok(true)
    }

    /// Drop one level of re-entrancy, unlocking when it reaches zero
    ///
    /// Releasing a lock this holder does not hold is an `Error::LockUsage`.
    pub fn release(&mut self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::LockUsage(format!(
                "releasing {} which is not acquired",
                self.path.display()
            )));
        }

        self.count -= 1;
        if self.count > 0 {
            return Ok(());
        }

        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {}: {}", self.path.display(), e);
            }
        }
        self.mode = None;
        self.registry.note_released(&self.path);
        debug!("Released lock on {}", self.path.display());
        Ok(())
    }

    /// Acquire exclusively (blocking) and release when the guard drops
    pub fn exclusive(&mut self) -> Result<LockGuard<'_>> {
        self.acquire_exclusive()?;
        Ok(LockGuard { lock: self })
    }

    /// Acquire shared (blocking) and release when the guard drops
    pub fn shared(&mut self) -> Result<LockGuard<'_>> {
        self.acquire_shared()?;
        Ok(LockGuard { lock: self })
    }
}

impl fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("path", &self.path)
            .field("count", &self.count)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        if self.count > 0 {
            self.count = 1;
            if let Err(e) = self.release() {
                warn!("Failed to release {} on drop: {}", self.path.display(), e);
            }
        }
    }
}

/// Releases one level of a [`ResourceLock`] when dropped
pub struct LockGuard<'a> {
    lock: &'a mut ResourceLock,
}

impl LockGuard<'_> {
    pub fn mode(&self) -> Option<LockMode> {
        self.lock.mode()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!("Failed to release lock guard: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn holders(temp_dir: &TempDir) -> (ResourceLock, ResourceLock, Arc<LockRegistry>) {
        let registry = Arc::new(LockRegistry::new());
        let path = temp_dir.path().join(".using_resources");
        (
            ResourceLock::new(&path, Arc::clone(&registry)),
            ResourceLock::new(&path, Arc::clone(&registry)),
            registry,
        )
    }

    /// Two acquire/release cycles by the same holder both succeed
    #[test]
    fn test_sequential_cycles() {
        let temp_dir = TempDir::new().unwrap();
        let (mut lock, _, _) = holders(&temp_dir);

        for _ in 0..2 {
            assert!(lock.try_acquire_exclusive().unwrap());
            assert!(lock.is_already_acquired());
            lock.release().unwrap();
            assert!(!lock.is_already_acquired());
        }
    }

    /// A second holder cannot take the lock while the first holds it exclusively
    #[test]
    fn test_second_holder_blocked_by_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, _) = holders(&temp_dir);

        first.acquire_exclusive().unwrap();
        assert!(!second.try_acquire_exclusive().unwrap());
        assert!(!second.try_acquire_shared().unwrap());
        assert!(!second.is_already_acquired());

        first.release().unwrap();
        assert!(second.try_acquire_exclusive().unwrap());
    }

    /// Shared holders coexist but exclude an exclusive request
    #[test]
    fn test_shared_holders() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, registry) = holders(&temp_dir);
        let mut third = ResourceLock::new(first.path().to_path_buf(), Arc::clone(&registry));

        assert!(first.try_acquire_shared().unwrap());
        assert!(second.try_acquire_shared().unwrap());
        assert_eq!(registry.holders(first.path()), 2);
        assert!(!third.try_acquire_exclusive().unwrap());

        first.release().unwrap();
        second.release().unwrap();
        assert_eq!(registry.holders(first.path()), 0);
        assert!(third.try_acquire_exclusive().unwrap());
    }

    /// Re-entrant acquisition only unlocks after the matching number of releases
    #[test]
    fn test_reentrant_counting() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, _) = holders(&temp_dir);

        first.acquire_exclusive().unwrap();
        assert!(first.try_acquire_exclusive().unwrap());
        assert!(first.try_acquire_shared().unwrap());
        assert_eq!(first.count(), 3);
        assert_eq!(first.mode(), Some(LockMode::Exclusive));

        first.release().unwrap();
        first.release().unwrap();
        assert!(!second.try_acquire_exclusive().unwrap());

        first.release().unwrap();
        assert!(second.try_acquire_exclusive().unwrap());
    }

    /// Asking for exclusive while holding shared is a usage error
    #[test]
    fn test_shared_to_exclusive_is_usage_error() {
        let temp_dir = TempDir::new().unwrap();
        let (mut lock, _, _) = holders(&temp_dir);

        lock.acquire_shared().unwrap();
        let err = lock.try_acquire_exclusive().unwrap_err();
        assert!(matches!(err, Error::LockUsage(_)));
        assert_eq!(lock.mode(), Some(LockMode::Shared));
        assert_eq!(lock.count(), 1);
    }

    /// Releasing a lock that is not held is a usage error
    #[test]
    fn test_release_not_held_is_usage_error() {
        let temp_dir = TempDir::new().unwrap();
        let (mut lock, _, _) = holders(&temp_dir);

        assert!(matches!(lock.release(), Err(Error::LockUsage(_))));
    }

    /// Hooks run in order on each unheld-to-held transition only
    #[test]
    fn test_post_acquire_hooks() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, registry) = holders(&temp_dir);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let log_a = Arc::clone(&calls);
        let log_b = Arc::clone(&calls);
        registry.add_post_acquire_hook(first.path(), move |_| log_a.lock().unwrap().push("a"));
        let hook_b =
            registry.add_post_acquire_hook(first.path(), move |_| log_b.lock().unwrap().push("b"));

        first.acquire_shared().unwrap();
        first.acquire_shared().unwrap();
        second.acquire_shared().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);

        first.release().unwrap();
        first.release().unwrap();
        second.release().unwrap();

        assert!(registry.remove_post_acquire_hook(hook_b));
        assert!(!registry.remove_post_acquire_hook(hook_b));

        first.acquire_exclusive().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "a"]);
    }

    /// Hooks registered for another path are not run
    #[test]
    fn test_hooks_scoped_to_path() {
        let temp_dir = TempDir::new().unwrap();
        let (mut lock, _, registry) = holders(&temp_dir);

        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        registry.add_post_acquire_hook(temp_dir.path().join("other"), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        lock.acquire_exclusive().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    /// Guards release on drop
    #[test]
    fn test_guard_releases() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, _) = holders(&temp_dir);

        {
            let guard = first.exclusive().unwrap();
            assert_eq!(guard.mode(), Some(LockMode::Exclusive));
        }
        assert!(!first.is_already_acquired());
        assert!(second.try_acquire_exclusive().unwrap());
    }

    /// Dropping a holder releases the OS lock
    #[test]
    fn test_drop_releases() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, registry) = holders(&temp_dir);

        first.acquire_exclusive().unwrap();
        first.acquire_exclusive().unwrap();
        drop(first);

        assert_eq!(registry.holders(second.path()), 0);
        assert!(second.try_acquire_exclusive().unwrap());
    }

    /// `wait_exclusive` polls until the other holder lets go
    #[test]
    fn test_wait_exclusive_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let (mut first, mut second, _) = holders(&temp_dir);
        first.acquire_exclusive().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            second.wait_exclusive().unwrap();
            tx.send(started.elapsed()).unwrap();
            second
        });

        thread::sleep(Duration::from_millis(300));
        assert!(rx.try_recv().is_err());
        first.release().unwrap();

        let waited = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(waited >= Duration::from_millis(200));
        let second = waiter.join().unwrap();
        assert_eq!(second.mode(), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let path = temp_dir.path().join("deep/dir/.using_resources");
        let mut lock = ResourceLock::new(&path, registry);

        lock.acquire_exclusive().unwrap();
        assert!(path.exists());
    }
}
