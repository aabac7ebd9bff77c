//! Crash-safe, lock-guarded JSON documents shared between processes.
//!
//! A [`DocumentStore`] provides the one primitive every other component is
//! built on: read-modify-write of a single JSON file under an exclusive lock.
//! New content becomes visible only through a rename of a fully written
//! temporary file in the same directory, so a reader (or a crashed writer)
//! never leaves a half-written document behind.

pub mod lock;

pub use lock::{DocumentLock, FileLock, LockGuard, MemoryLock, lock_path_for};

use crate::config::StoreConfig;
use crate::error::{CoordError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Default time to wait for a contended document lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle for lock-guarded access to JSON documents.
///
/// The store holds no document state itself; every call names the document
/// path explicitly.
#[derive(Clone)]
pub struct DocumentStore {
    lock: Arc<dyn DocumentLock>,
    timeout: Duration,
}

impl DocumentStore {
    pub fn new(lock: Arc<dyn DocumentLock>, timeout: Duration) -> Self {
        Self { lock, timeout }
    }

    /// Store backed by OS advisory locks on sidecar files.
    pub fn with_file_locks(timeout: Duration, retry_interval: Duration) -> Self {
        Self::new(Arc::new(FileLock::new(retry_interval)), timeout)
    }

    /// Store backed by an in-process lock table (tests).
    pub fn in_memory_locks(timeout: Duration) -> Self {
        Self::new(Arc::new(MemoryLock::new()), timeout)
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_file_locks(config.lock_timeout(), config.lock_retry_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the document lock with the store's default timeout.
    pub fn scoped_lock(&self, path: &Path) -> Result<LockGuard> {
        self.scoped_lock_with_timeout(path, self.timeout)
    }

    /// Acquire the document lock, waiting at most `timeout`.
    ///
    /// The lock is released when the guard drops.
    pub fn scoped_lock_with_timeout(&self, path: &Path, timeout: Duration) -> Result<LockGuard> {
        self.lock.acquire(path, timeout)
    }

    /// Read the document, or `default()` if it is absent or unparsable.
    pub fn read<T, D>(&self, path: &Path, default: D) -> Result<T>
    where
        T: DeserializeOwned,
        D: FnOnce() -> T,
    {
        let _guard = self.scoped_lock(path)?;
        load_document(path, default, Unparsable::UseDefault)
    }

    /// Apply a pure transform to the document and commit the result.
    ///
    /// Returns the document as written. An existing document that does not
    /// parse is never overwritten: the call fails with
    /// [`CoordError::Corrupt`] and the file is left as it was.
    pub fn update<T, D, F>(&self, path: &Path, default: D, transform: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        D: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        let _guard = self.scoped_lock(path)?;
        let doc = transform(load_document(path, default, Unparsable::Refuse)?);
        stage(path, &doc)?.commit()?;
        debug!(path = %path.display(), "Committed document");
        Ok(doc)
    }

    /// Mutate the document in place and commit it if `transform` succeeds.
    ///
    /// On `Err` nothing is written and the previous document stays intact,
    /// and an unparsable document is refused as in [`update`](Self::update).
    /// The lock is held from the read through the rename.
    pub fn try_update<T, R, D, F>(&self, path: &Path, default: D, transform: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        D: FnOnce() -> T,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = self.scoped_lock(path)?;
        let mut doc = load_document(path, default, Unparsable::Refuse)?;
        let out = transform(&mut doc)?;
        stage(path, &doc)?.commit()?;
        debug!(path = %path.display(), "Committed document");
        Ok(out)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// What a load does with a document that exists but does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unparsable {
    UseDefault,
    Refuse,
}

fn load_document<T, D>(path: &Path, default: D, unparsable: Unparsable) -> Result<T>
where
    T: DeserializeOwned,
    D: FnOnce() -> T,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(default()),
        Err(source) => {
            return Err(CoordError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    // Nothing to lose in an empty file.
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(default());
    }

    match serde_json::from_slice(&bytes) {
        Ok(doc) => Ok(doc),
        Err(source) if unparsable == Unparsable::Refuse => {
            warn!(path = %path.display(), error = %source, "Unparsable document, refusing to write");
            Err(CoordError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Unparsable document, using default");
            Ok(default())
        }
    }
}

/// A fully written temporary file waiting to be renamed over its target.
///
/// Dropping it without [`commit`](Self::commit) discards the new content.
pub(crate) struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Atomically replace the target with the staged content.
    pub(crate) fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|err| CoordError::Persist {
                path: target.clone(),
                source: err.error,
            })?;
        Ok(())
    }
}

/// Serialize `doc` into a synced temporary file next to `path`.
pub(crate) fn stage<T: Serialize>(path: &Path, doc: &T) -> Result<StagedWrite> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|source| CoordError::Persist {
        path: dir.clone(),
        source,
    })?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    );
    let persist_err = |source: std::io::Error| CoordError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(persist_err)?;

    let bytes = serde_json::to_vec_pretty(doc).map_err(|source| CoordError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    temp.write_all(&bytes).map_err(persist_err)?;
    temp.write_all(b"\n").map_err(persist_err)?;
    temp.as_file().sync_all().map_err(persist_err)?;

    Ok(StagedWrite {
        temp,
        target: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
        items: Vec<String>,
    }

    fn store() -> DocumentStore {
        DocumentStore::with_file_locks(Duration::from_secs(5), Duration::from_millis(5))
    }

    #[test]
    fn read_missing_document_returns_default() {
        let dir = TempDir::new().unwrap();
        let doc: Counter = store()
            .read(&dir.path().join("missing.json"), Counter::default)
            .unwrap();
        assert_eq!(doc, Counter::default());
    }

    #[test]
    fn read_unparsable_document_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let doc: Counter = store().read(&path, Counter::default).unwrap();
        assert_eq!(doc.value, 0);
    }

    #[test]
    fn update_refuses_to_overwrite_unparsable_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = store();

        let err = store
            .update(&path, Counter::default, |mut c| {
                c.value = 1;
                c
            })
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::CorruptDocument);
        assert!(!err.is_retryable());

        let result: Result<()> = store.try_update(&path, Counter::default, |_: &mut Counter| Ok(()));
        assert!(matches!(result, Err(CoordError::Corrupt { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), b"{ not json");
    }

    #[test]
    fn empty_document_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, b"\n").unwrap();

        let written = store()
            .update(&path, Counter::default, |mut c| {
                c.value += 1;
                c
            })
            .unwrap();
        assert_eq!(written.value, 1);
    }

    #[test]
    fn update_returns_and_persists_new_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        let store = store();

        let written = store
            .update(&path, Counter::default, |mut c| {
                c.value += 1;
                c
            })
            .unwrap();
        assert_eq!(written.value, 1);

        let read: Counter = store.read(&path, Counter::default).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn failed_transform_leaves_document_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        let store = store();
        store
            .update(&path, Counter::default, |mut c| {
                c.value = 7;
                c
            })
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let result: Result<()> = store.try_update(&path, Counter::default, |c: &mut Counter| {
            c.value = 99;
            Err(CoordError::InvalidInput("rejected".into()))
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn writer_killed_before_rename_leaves_original_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let store = store();
        let original = Counter {
            value: 3,
            items: vec!["a".into(), "b".into(), "c".into()],
        };
        store
            .update(&path, Counter::default, |_| original.clone())
            .unwrap();

        // Temp file fully written, process dies before the rename.
        let replacement = Counter {
            value: 0,
            items: Vec::new(),
        };
        let staged = {
            let _guard = store.scoped_lock(&path).unwrap();
            stage(&path, &replacement).unwrap()
        };
        std::mem::forget(staged);

        let read: Counter = store.read(&path, Counter::default).unwrap();
        assert_eq!(read, original);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // Separate store per thread: separate lock file handles.
                    let store = store();
                    for j in 0..10 {
                        store
                            .update(&path, Counter::default, |mut c| {
                                c.value += 1;
                                c.items.push(format!("{i}-{j}"));
                                c
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let doc: Counter = store().read(&path, Counter::default).unwrap();
        assert_eq!(doc.value, 80);
        assert_eq!(doc.items.len(), 80);
    }

    #[test]
    fn lock_timeout_is_distinct_from_persist_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let store = DocumentStore::in_memory_locks(Duration::from_millis(20));
        let _held = store.scoped_lock(&path).unwrap();

        let err = store
            .update(&path, Counter::default, |c| c)
            .unwrap_err();
        assert!(matches!(err, CoordError::LockTimeout { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn explicit_timeout_overrides_the_store_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let store = DocumentStore::in_memory_locks(Duration::from_secs(30));
        let held = store.scoped_lock(&path).unwrap();

        let err = store
            .scoped_lock_with_timeout(&path, Duration::from_millis(20))
            .unwrap_err();
        match err {
            CoordError::LockTimeout { waited, .. } => {
                assert!(waited >= Duration::from_millis(20));
                assert!(waited < Duration::from_secs(30));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }

        drop(held);
        assert!(store
            .scoped_lock_with_timeout(&path, Duration::from_millis(20))
            .is_ok());
    }
}
