//! Lock backends for [`DocumentStore`](super::DocumentStore).
//!
//! [`FileLock`] takes an exclusive advisory lock on a sidecar `<doc>.lock`
//! file and binds every process on the host. [`MemoryLock`] is a mutex-backed
//! stand-in for tests that only need in-process exclusion.
//!
//! The sidecar file is created on demand and never truncated or removed:
//! deleting it would let a second process lock a fresh inode while the first
//! still holds the old one.

use crate::error::{CoordError, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default pause between attempts on a contended file lock.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive-lock provider keyed on a document path.
pub trait DocumentLock: Send + Sync {
    /// Block until the lock for `path` is held or `timeout` elapses.
    fn acquire(&self, path: &Path, timeout: Duration) -> Result<LockGuard>;
}

/// Proof of a held document lock. Dropping it releases the lock.
pub struct LockGuard {
    path: PathBuf,
    _held: Box<dyn Send>,
}

impl LockGuard {
    fn new(path: &Path, held: impl Send + 'static) -> Self {
        Self {
            path: path.to_path_buf(),
            _held: Box::new(held),
        }
    }

    /// The document this guard protects.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

/// Sidecar lock file for a document: `tasks.json` -> `tasks.json.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Cross-process advisory lock on a sidecar file.
#[derive(Debug, Clone)]
pub struct FileLock {
    retry_interval: Duration,
}

impl FileLock {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }
}

impl Default for FileLock {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }
}

impl DocumentLock for FileLock {
    fn acquire(&self, path: &Path, timeout: Duration) -> Result<LockGuard> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CoordError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| CoordError::Io {
                path: lock_path.clone(),
                source,
            })?;

        let started = Instant::now();
        loop {
            let locked = try_lock_exclusive(&file).map_err(|source| CoordError::Io {
                path: lock_path.clone(),
                source,
            })?;
            if locked {
                debug!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "Acquired document lock");
                return Ok(LockGuard::new(path, HeldFile(file)));
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoordError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            std::thread::sleep(self.retry_interval.min(timeout - waited));
        }
    }
}

/// Open lock file; unlocking on drop covers every exit path including unwinding.
struct HeldFile(File);

impl Drop for HeldFile {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        let _ = unlock(&self.0);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(err)) => Err(err),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) -> std::io::Result<()> {
    file.unlock()
}

#[derive(Default)]
struct MemoryLockState {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// In-process lock table for tests that don't want real file contention.
#[derive(Clone, Default)]
pub struct MemoryLock {
    state: Arc<MemoryLockState>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some guard currently holds `path`.
    pub fn is_held(&self, path: &Path) -> bool {
        self.state
            .held
            .lock()
            .map(|held| held.contains(path))
            .unwrap_or(false)
    }
}

impl DocumentLock for MemoryLock {
    fn acquire(&self, path: &Path, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        while held.contains(path) {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoordError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            held = self
                .state
                .released
                .wait_timeout(held, timeout - waited)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        held.insert(path.to_path_buf());
        Ok(LockGuard::new(
            path,
            HeldEntry {
                state: Arc::clone(&self.state),
                path: path.to_path_buf(),
            },
        ))
    }
}

struct HeldEntry {
    state: Arc<MemoryLockState>,
    path: PathBuf,
}

impl Drop for HeldEntry {
    fn drop(&mut self) {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.path);
        self.state.released.notify_all();
    }
}
