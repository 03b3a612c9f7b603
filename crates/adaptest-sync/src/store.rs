//! Local durable storage of session snapshots.
//!
//! The local store is the source of truth while a student is working: every
//! session mutation is written here before the operation returns.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use adaptest_core::snapshot::SessionSnapshot;

use crate::error::StoreError;

/// Durable per-attempt snapshot storage.
pub trait LocalStore: Send + Sync {
    /// Replace the stored snapshot for the snapshot's attempt.
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    fn load(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, StoreError>;

    /// Ids of every stored attempt, sorted.
    fn list(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Returns `true` if a snapshot was removed.
    fn remove(&self, attempt_id: Uuid) -> Result<bool, StoreError>;

    /// Save unless the stored snapshot is newer. Returns `true` if written.
    fn save_if_newer(&self, snapshot: &SessionSnapshot) -> Result<bool, StoreError> {
        match self.load(snapshot.attempt_id)? {
            Some(existing) if existing.is_newer_than(snapshot) => Ok(false),
            _ => {
                self.save(snapshot)?;
                Ok(true)
            }
        }
    }
}

/// One pretty-printed JSON file per attempt in a directory.
///
/// Writes go to a temporary file in the same directory, are fsynced, then
/// renamed over the target, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, attempt_id: Uuid) -> PathBuf {
        self.dir.join(format!("{attempt_id}.json"))
    }
}

impl LocalStore for FileStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let path = self.path_for(snapshot.attempt_id);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        tracing::trace!(
            attempt = %snapshot.attempt_id,
            revision = snapshot.revision,
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, StoreError> {
        let path = self.path_for(attempt_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut ids: Vec<Uuid> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str()?.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn remove(&self, attempt_id: Uuid) -> Result<bool, StoreError> {
        let path = self.path_for(attempt_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<Uuid, SessionSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionSnapshot>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for MemoryStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        self.lock().insert(snapshot.attempt_id, snapshot.clone());
        Ok(())
    }

    fn load(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.lock().get(&attempt_id).cloned())
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids: Vec<Uuid> = self.lock().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn remove(&self, attempt_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().remove(&attempt_id).is_some())
    }
}
