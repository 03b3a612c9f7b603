//! Pending remote writes, at most one per attempt.
//!
//! Enqueuing a newer snapshot replaces the pending one for the same attempt,
//! so a slow or offline remote only ever receives the latest state. A failed
//! push goes back into the queue only if nothing newer arrived meanwhile.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use adaptest_core::snapshot::SessionSnapshot;

/// A snapshot waiting to be pushed.
#[derive(Debug, Clone)]
pub struct Pending {
    pub snapshot: SessionSnapshot,
    /// Failed push attempts so far.
    pub attempts: u32,
    /// Not pushed before this instant.
    pub not_before: Instant,
}

impl Pending {
    pub fn attempt_id(&self) -> Uuid {
        self.snapshot.attempt_id
    }
}

/// What `enqueue` did with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Nothing was pending for the attempt.
    Queued,
    /// Replaced an older pending snapshot.
    Superseded,
    /// Dropped: a snapshot at least as new is pending or already pushed.
    Stale,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<Uuid, Pending>,
    /// Highest revision acknowledged by the remote, per attempt still in
    /// progress.
    pushed: HashMap<Uuid, u64>,
    superseded: u64,
}

impl QueueState {
    fn already_pushed(&self, snapshot: &SessionSnapshot) -> bool {
        self.pushed
            .get(&snapshot.attempt_id)
            .is_some_and(|&revision| revision >= snapshot.revision)
    }
}

/// Shared queue between attempt runners and the sync worker.
#[derive(Debug, Default)]
pub struct SyncQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `snapshot` for an immediate push.
    pub fn enqueue(&self, snapshot: SessionSnapshot) -> Enqueued {
        let attempt_id = snapshot.attempt_id;
        let revision = snapshot.revision;
        let outcome = {
            let mut state = self.lock();
            if state.already_pushed(&snapshot) {
                Enqueued::Stale
            } else {
                let fresh = Pending {
                    snapshot,
                    attempts: 0,
                    not_before: Instant::now(),
                };
                match state.pending.get(&attempt_id) {
                    Some(existing) if !fresh.snapshot.is_newer_than(&existing.snapshot) => {
                        Enqueued::Stale
                    }
                    Some(_) => {
                        state.pending.insert(attempt_id, fresh);
                        state.superseded += 1;
                        Enqueued::Superseded
                    }
                    None => {
                        state.pending.insert(attempt_id, fresh);
                        Enqueued::Queued
                    }
                }
            }
        };

        match outcome {
            Enqueued::Stale => {
                tracing::debug!(attempt = %attempt_id, revision, "stale snapshot dropped");
            }
            Enqueued::Superseded => {
                tracing::debug!(attempt = %attempt_id, revision, "pending snapshot superseded");
                self.notify.notify_one();
            }
            Enqueued::Queued => self.notify.notify_one(),
        }
        outcome
    }

    /// Remove and return every entry due at `now`.
    pub fn take_due(&self, now: Instant) -> Vec<Pending> {
        let mut state = self.lock();
        let due: Vec<Uuid> = state
            .pending
            .iter()
            .filter(|(_, p)| p.not_before <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut taken: Vec<Pending> = due
            .into_iter()
            .filter_map(|id| state.pending.remove(&id))
            .collect();
        taken.sort_by_key(|p| p.not_before);
        taken
    }

    /// Put a failed push back with a delay.
    ///
    /// Returns `false` (and drops it) when a newer snapshot for the attempt
    /// was enqueued or pushed since it was taken.
    pub fn requeue(&self, mut pending: Pending, delay: Duration) -> bool {
        let mut state = self.lock();
        if state.pending.contains_key(&pending.attempt_id()) || state.already_pushed(&pending.snapshot)
        {
            state.superseded += 1;
            tracing::debug!(
                attempt = %pending.attempt_id(),
                revision = pending.snapshot.revision,
                "failed push superseded, not retried"
            );
            return false;
        }
        pending.attempts += 1;
        pending.not_before = Instant::now() + delay;
        state.pending.insert(pending.attempt_id(), pending);
        true
    }

    /// Record that the remote acknowledged `snapshot`.
    ///
    /// A submitted or abandoned attempt has no later snapshots, so once its
    /// final state is acknowledged (and nothing else is pending) the queue
    /// forgets it. The remote still rejects any older push on its own.
    pub fn mark_pushed(&self, snapshot: &SessionSnapshot) {
        let attempt_id = snapshot.attempt_id;
        let mut state = self.lock();
        if snapshot.is_finished() && !state.pending.contains_key(&attempt_id) {
            state.pushed.remove(&attempt_id);
            tracing::debug!(attempt = %attempt_id, "final snapshot acknowledged");
            return;
        }
        let entry = state.pushed.entry(attempt_id).or_insert(snapshot.revision);
        *entry = (*entry).max(snapshot.revision);
    }

    /// Highest revision the remote acknowledged for an attempt.
    pub fn pushed_revision(&self, attempt_id: Uuid) -> Option<u64> {
        self.lock().pushed.get(&attempt_id).copied()
    }

    pub fn pending_revision(&self, attempt_id: Uuid) -> Option<u64> {
        self.lock()
            .pending
            .get(&attempt_id)
            .map(|p| p.snapshot.revision)
    }

    /// Earliest instant at which something becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.lock().pending.values().map(|p| p.not_before).min()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Snapshots dropped because something newer replaced them.
    pub fn superseded(&self) -> u64 {
        self.lock().superseded
    }

    /// Resolves after the next enqueue.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::snapshot;
    use adaptest_core::session::Phase;

    #[tokio::test]
    async fn newer_snapshot_supersedes_pending() {
        let queue = SyncQueue::new();
        let id = Uuid::new_v4();

        assert_eq!(queue.enqueue(snapshot(id, 1)), Enqueued::Queued);
        assert_eq!(queue.enqueue(snapshot(id, 2)), Enqueued::Superseded);
        assert_eq!(queue.enqueue(snapshot(id, 2)), Enqueued::Stale);
        assert_eq!(queue.enqueue(snapshot(id, 1)), Enqueued::Stale);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_revision(id), Some(2));
        assert_eq!(queue.superseded(), 1);
    }

    #[tokio::test]
    async fn attempts_are_independent() {
        let queue = SyncQueue::new();
        queue.enqueue(snapshot(Uuid::new_v4(), 1));
        queue.enqueue(snapshot(Uuid::new_v4(), 1));
        assert_eq!(queue.take_due(Instant::now()).len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_stale_push_is_not_retried_over_newer() {
        let queue = SyncQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(snapshot(id, 1));

        let taken = queue.take_due(Instant::now()).pop().unwrap();
        queue.enqueue(snapshot(id, 2));

        assert!(!queue.requeue(taken, Duration::from_secs(1)));
        assert_eq!(queue.pending_revision(id), Some(2));
        assert_eq!(queue.superseded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_entry_waits_for_backoff() {
        let queue = SyncQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(snapshot(id, 1));

        let taken = queue.take_due(Instant::now()).pop().unwrap();
        assert!(queue.requeue(taken, Duration::from_secs(4)));
        assert!(queue.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(4)).await;
        let retried = queue.take_due(Instant::now()).pop().unwrap();
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test]
    async fn pushed_revisions_make_older_snapshots_stale() {
        let queue = SyncQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(snapshot(id, 3));
        let taken = queue.take_due(Instant::now()).pop().unwrap();
        queue.mark_pushed(&taken.snapshot);

        assert!(!queue.requeue(taken, Duration::ZERO));
        assert_eq!(queue.enqueue(snapshot(id, 2)), Enqueued::Stale);
        assert_eq!(queue.enqueue(snapshot(id, 4)), Enqueued::Queued);
        assert_eq!(queue.pushed_revision(id), Some(3));
    }

    #[tokio::test]
    async fn finished_attempts_are_forgotten_once_pushed() {
        let queue = SyncQueue::new();
        let id = Uuid::new_v4();
        queue.mark_pushed(&snapshot(id, 4));
        assert_eq!(queue.pushed_revision(id), Some(4));

        let mut last = snapshot(id, 5);
        last.phase = Phase::Submitted;
        last.submitted = true;

        // A finished snapshot with a newer one still pending is remembered.
        queue.enqueue(snapshot(id, 6));
        queue.mark_pushed(&last);
        assert_eq!(queue.pushed_revision(id), Some(5));

        queue.take_due(Instant::now());
        queue.mark_pushed(&last);
        assert_eq!(queue.pushed_revision(id), None);

        let mut abandoned = snapshot(Uuid::new_v4(), 2);
        abandoned.phase = Phase::Abandoned;
        queue.mark_pushed(&abandoned);
        assert_eq!(queue.pushed_revision(abandoned.attempt_id), None);
    }

    #[tokio::test]
    async fn enqueue_wakes_waiter() {
        let queue = std::sync::Arc::new(SyncQueue::new());
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.notified().await })
        };
        queue.enqueue(snapshot(Uuid::new_v4(), 1));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
