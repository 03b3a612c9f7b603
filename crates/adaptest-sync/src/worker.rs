//! Background push of queued snapshots to the remote store.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use adaptest_core::snapshot::SessionSnapshot;

use crate::engine::Catalog;
use crate::error::SyncError;
use crate::queue::{Pending, SyncQueue};
use crate::reconcile::reconcile;
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::store::LocalStore;

/// Counts from one [`SyncWorker::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub pushed: usize,
    /// Conflicts resolved by reconciling and re-queuing the merged snapshot.
    pub reconciled: usize,
    /// Failed pushes scheduled for retry.
    pub retrying: usize,
    /// Failed pushes dropped because a newer snapshot replaced them.
    pub superseded: usize,
}

impl FlushReport {
    pub fn is_idle(&self) -> bool {
        *self == FlushReport::default()
    }
}

/// Drains the [`SyncQueue`] into a [`RemoteStore`].
///
/// Pushes never block session operations and never give up: failures are
/// re-queued with backoff until the remote accepts the snapshot or a newer
/// one supersedes it.
pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    catalog: Arc<Catalog>,
    policy: RetryPolicy,
    max_in_flight: usize,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<SyncQueue>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        catalog: Arc<Catalog>,
        policy: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            queue,
            local,
            remote,
            catalog,
            policy,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Push every due snapshot, at most `max_in_flight` at a time.
    pub async fn flush(&self) -> FlushReport {
        let due = self.queue.take_due(Instant::now());
        let mut report = FlushReport::default();
        if due.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut futures = FuturesUnordered::new();

        for pending in due {
            let remote = Arc::clone(&self.remote);
            let semaphore = Arc::clone(&semaphore);
            futures.push(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => remote.push(&pending.snapshot).await,
                    Err(_) => Err(SyncError::Network("push limiter closed".into())),
                };
                (pending, result)
            });
        }

        while let Some((pending, result)) = futures.next().await {
            match result {
                Ok(()) => {
                    tracing::debug!(
                        attempt = %pending.attempt_id(),
                        revision = pending.snapshot.revision,
                        "snapshot pushed"
                    );
                    self.queue.mark_pushed(&pending.snapshot);
                    report.pushed += 1;
                }
                Err(SyncError::Conflict { remote }) => {
                    if self.resolve_conflict(pending, *remote) {
                        report.reconciled += 1;
                    } else {
                        report.superseded += 1;
                    }
                }
                Err(e) => {
                    let delay = self.policy.delay_after(pending.attempts, &e);
                    let attempt_id = pending.attempt_id();
                    if e.is_retryable() {
                        tracing::warn!(attempt = %attempt_id, retry_in = ?delay, "push failed: {e}");
                    } else {
                        tracing::error!(attempt = %attempt_id, retry_in = ?delay, "push rejected: {e}");
                    }
                    if self.queue.requeue(pending, delay) {
                        report.retrying += 1;
                    } else {
                        report.superseded += 1;
                    }
                }
            }
        }

        report
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped),
    /// flushing whenever something is enqueued or a retry comes due.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(remote = self.remote.name(), "sync worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.flush().await;
            if !report.is_idle() {
                tracing::debug!(?report, "flush finished");
            }

            let next_due = self.queue.next_due();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.queue.notified() => {}
                _ = sleep_until_due(next_due) => {}
            }
        }

        let report = self.flush().await;
        tracing::info!(?report, pending = self.queue.len(), "sync worker stopped");
    }

    /// Reconcile with the remote copy, store the merge locally and queue it.
    /// Returns `false` when the conflicting snapshot was already superseded.
    fn resolve_conflict(&self, pending: Pending, remote: SessionSnapshot) -> bool {
        let attempt_id = pending.attempt_id();
        if self.queue.pending_revision(attempt_id).is_some() {
            // A newer local snapshot is already queued; it will conflict and
            // be reconciled in turn.
            return false;
        }

        let Some(graph) = self.catalog.get(&pending.snapshot.test_id) else {
            tracing::warn!(
                attempt = %attempt_id,
                test = %pending.snapshot.test_id,
                "conflict for unknown test, keeping remote copy"
            );
            return false;
        };

        tracing::warn!(
            attempt = %attempt_id,
            local_revision = pending.snapshot.revision,
            remote_revision = remote.revision,
            "remote holds a newer snapshot, reconciling"
        );
        let Some(merged) = reconcile(&graph, Some(pending.snapshot), Some(remote)) else {
            return false;
        };

        if let Err(e) = self.local.save_if_newer(&merged.snapshot) {
            tracing::error!(attempt = %attempt_id, "failed to save reconciled snapshot: {e}");
        }
        self.queue.enqueue(merged.snapshot);
        true
    }
}

async fn sleep_until_due(next_due: Option<Instant>) {
    match next_due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
