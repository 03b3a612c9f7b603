//! Attempt orchestration: test catalog, access checks, start and resume.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use adaptest_core::error::{SessionError, ValidationError};
use adaptest_core::graph::ModuleGraph;
use adaptest_core::model::TestDefinition;
use adaptest_core::parser::load_definition_directory;
use adaptest_core::session::{Repair, Session};
use adaptest_core::snapshot::SessionSnapshot;

use crate::attempt::AttemptRunner;
use crate::error::AttemptError;
use crate::queue::SyncQueue;
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::store::LocalStore;
use crate::worker::SyncWorker;

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

/// Decides whether a user may take a test.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn has_access(&self, user_id: &str, test_id: &str) -> anyhow::Result<bool>;
}

/// Grants every user access to every test.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn has_access(&self, _user_id: &str, _test_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// A fixed set of (user, test) grants.
#[derive(Debug, Clone, Default)]
pub struct StaticAccess {
    grants: HashSet<(String, String)>,
}

impl StaticAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user_id: impl Into<String>, test_id: impl Into<String>) -> Self {
        self.grants.insert((user_id.into(), test_id.into()));
        self
    }
}

#[async_trait]
impl AccessGate for StaticAccess {
    async fn has_access(&self, user_id: &str, test_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .grants
            .contains(&(user_id.to_string(), test_id.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Validated module graphs by test id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    graphs: BTreeMap<String, Arc<ModuleGraph>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a definition. Replaces any test with the same id.
    pub fn insert(&mut self, definition: TestDefinition) -> Result<Arc<ModuleGraph>, ValidationError> {
        let graph = Arc::new(ModuleGraph::build(definition)?);
        self.insert_graph(Arc::clone(&graph));
        Ok(graph)
    }

    /// Add an already validated graph.
    pub fn insert_graph(&mut self, graph: Arc<ModuleGraph>) {
        self.graphs.insert(graph.test_id().to_string(), graph);
    }

    /// Load every definition in `dir`. Invalid definitions are logged and
    /// returned alongside the catalog.
    pub fn from_directory(dir: &Path) -> Result<(Self, Vec<(String, ValidationError)>)> {
        let mut catalog = Self::new();
        let mut rejected = Vec::new();
        for definition in load_definition_directory(dir)? {
            let id = definition.id.clone();
            if let Err(e) = catalog.insert(definition) {
                tracing::warn!(test = %id, "rejecting test definition: {e}");
                rejected.push((id, e));
            }
        }
        Ok((catalog, rejected))
    }

    pub fn get(&self, test_id: &str) -> Option<Arc<ModuleGraph>> {
        self.graphs.get(test_id).cloned()
    }

    pub fn test_ids(&self) -> impl Iterator<Item = &str> {
        self.graphs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Starts and resumes attempts against a catalog of tests.
pub struct AttemptEngine {
    catalog: Arc<Catalog>,
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    queue: Arc<SyncQueue>,
    gate: Arc<dyn AccessGate>,
}

impl AttemptEngine {
    pub fn new(catalog: Catalog, local: Arc<dyn LocalStore>, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            local,
            remote: None,
            queue: Arc::new(SyncQueue::new()),
            gate,
        }
    }

    /// Resume falls back to `remote` for attempts missing locally.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// A worker pushing this engine's queue to `remote`.
    pub fn worker(
        &self,
        remote: Arc<dyn RemoteStore>,
        policy: RetryPolicy,
        max_in_flight: usize,
    ) -> SyncWorker {
        SyncWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.local),
            remote,
            Arc::clone(&self.catalog),
            policy,
            max_in_flight,
        )
    }

    /// Start a new attempt.
    ///
    /// Access is checked once, here. An attempt id that already exists in
    /// the local store, or on the remote when one is configured, is
    /// rejected: that attempt has to be continued with [`resume`](Self::resume).
    /// An unreachable remote does not block starting offline.
    pub async fn start(
        &self,
        user_id: &str,
        test_id: &str,
        attempt_id: Uuid,
    ) -> Result<AttemptRunner, AttemptError> {
        let graph = self
            .catalog
            .get(test_id)
            .ok_or_else(|| AttemptError::UnknownTest(test_id.to_string()))?;

        let allowed = self
            .gate
            .has_access(user_id, test_id)
            .await
            .map_err(|e| AttemptError::AccessCheck(format!("{e:#}")))?;
        if !allowed {
            return Err(AttemptError::AccessDenied {
                user_id: user_id.to_string(),
                test_id: test_id.to_string(),
            });
        }

        if let Some(existing) = self.existing(attempt_id).await? {
            tracing::warn!(attempt = %attempt_id, phase = %existing.phase, "attempt already exists");
            return Err(SessionError::InvalidState {
                operation: "start",
                phase: existing.phase,
            }
            .into());
        }

        let mut session = Session::new(graph, attempt_id);
        session.start()?;
        let mut runner = self.runner(session);
        runner.persist(true)?;

        tracing::info!(attempt = %attempt_id, user = user_id, test = test_id, "attempt started");
        Ok(runner)
    }

    /// Resume an attempt from the local store, or from the remote when the
    /// local copy is missing.
    pub async fn resume(
        &self,
        attempt_id: Uuid,
    ) -> Result<(AttemptRunner, Vec<Repair>), AttemptError> {
        let snapshot = match self.local.load(attempt_id)? {
            Some(snapshot) => snapshot,
            None => match &self.remote {
                Some(remote) => {
                    tracing::info!(attempt = %attempt_id, "not found locally, fetching from {}", remote.name());
                    remote
                        .fetch(attempt_id)
                        .await?
                        .ok_or(AttemptError::NotFound(attempt_id))?
                }
                None => return Err(AttemptError::NotFound(attempt_id)),
            },
        };

        let graph = self
            .catalog
            .get(&snapshot.test_id)
            .ok_or_else(|| AttemptError::UnknownTest(snapshot.test_id.clone()))?;

        let resumed = Session::resume(graph, snapshot)?;
        let repairs = resumed.repairs;
        let mut runner = self.runner(resumed.session);
        // Always rewrite locally: the snapshot may have come from the remote.
        runner.persist(!repairs.is_empty())?;

        Ok((runner, repairs))
    }

    async fn existing(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, AttemptError> {
        if let Some(snapshot) = self.local.load(attempt_id)? {
            return Ok(Some(snapshot));
        }
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        match remote.fetch(attempt_id).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::warn!(attempt = %attempt_id, "could not check {} for an existing attempt: {e}", remote.name());
                Ok(None)
            }
        }
    }

    fn runner(&self, session: Session) -> AttemptRunner {
        AttemptRunner::new(session, Arc::clone(&self.local), Arc::clone(&self.queue))
    }
}
