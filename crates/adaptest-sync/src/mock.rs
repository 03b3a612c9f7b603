//! In-memory remote store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use adaptest_core::snapshot::SessionSnapshot;

use crate::error::SyncError;
use crate::remote::RemoteStore;

/// A remote store that keeps snapshots in memory.
///
/// Behaves like the HTTP server: a push older than the stored snapshot is
/// rejected with [`SyncError::Conflict`]. Can be switched offline to
/// simulate a dropped connection.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    snapshots: Mutex<HashMap<Uuid, SessionSnapshot>>,
    offline: AtomicBool,
    push_count: AtomicU32,
    fetch_count: AtomicU32,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Store a snapshot directly, bypassing conflict checks.
    pub fn insert(&self, snapshot: SessionSnapshot) {
        self.lock().insert(snapshot.attempt_id, snapshot);
    }

    pub fn get(&self, attempt_id: Uuid) -> Option<SessionSnapshot> {
        self.lock().get(&attempt_id).cloned()
    }

    /// Number of push calls, including failed ones.
    pub fn push_count(&self) -> u32 {
        self.push_count.load(Ordering::Relaxed)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionSnapshot>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(SyncError::Network("connection refused (offline)".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        self.push_count.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;

        let mut snapshots = self.lock();
        if let Some(stored) = snapshots.get(&snapshot.attempt_id) {
            if stored.is_newer_than(snapshot) {
                return Err(SyncError::Conflict {
                    remote: Box::new(stored.clone()),
                });
            }
        }
        snapshots.insert(snapshot.attempt_id, snapshot.clone());
        Ok(())
    }

    async fn fetch(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, SyncError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;
        Ok(self.get(attempt_id))
    }
}
