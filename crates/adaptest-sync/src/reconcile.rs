//! Merging a local snapshot with the remote copy of the same attempt.

use adaptest_core::graph::ModuleGraph;
use adaptest_core::snapshot::SessionSnapshot;

/// How a reconciliation was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Only a local snapshot existed.
    LocalOnly,
    /// Only a remote snapshot existed.
    RemoteOnly,
    /// Local structure kept; this many answers were taken from the remote.
    Merged { remote_answers: usize },
    /// The snapshots disagree on which attempt or test they belong to. The
    /// one modified last wins whole.
    SyncConflict { local_won: bool },
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub snapshot: SessionSnapshot,
    pub resolution: Resolution,
}

/// Merge `local` and `remote` snapshots of an attempt.
///
/// The local module structure (phase, module path, position, timer) always
/// wins. Answers to questions of the local active module are merged one by
/// one, the most recently modified answer winning. A cleared answer is a
/// blank entry with its own timestamp, so it beats an older remote value.
/// The merged snapshot gets a revision above both inputs so the remote
/// accepts it.
pub fn reconcile(
    graph: &ModuleGraph,
    local: Option<SessionSnapshot>,
    remote: Option<SessionSnapshot>,
) -> Option<Reconciled> {
    let (mut local, remote) = match (local, remote) {
        (None, None) => return None,
        (Some(local), None) => {
            return Some(Reconciled {
                snapshot: local,
                resolution: Resolution::LocalOnly,
            })
        }
        (None, Some(remote)) => {
            return Some(Reconciled {
                snapshot: remote,
                resolution: Resolution::RemoteOnly,
            })
        }
        (Some(local), Some(remote)) => (local, remote),
    };

    if local.attempt_id != remote.attempt_id || local.test_id != remote.test_id {
        let local_won = local.last_modified >= remote.last_modified;
        tracing::warn!(
            local_attempt = %local.attempt_id,
            remote_attempt = %remote.attempt_id,
            local_test = %local.test_id,
            remote_test = %remote.test_id,
            local_won,
            "snapshots disagree on ownership, last write wins"
        );
        let snapshot = if local_won { local } else { remote };
        return Some(Reconciled {
            snapshot,
            resolution: Resolution::SyncConflict { local_won },
        });
    }

    let mut remote_answers = 0;
    let active = local.current_module.as_deref().and_then(|id| graph.module(id));
    if let Some(module) = active {
        for question in &module.questions {
            let Some(theirs) = remote.answers.get(&question.id) else {
                continue;
            };
            let take = match local.answers.get(&question.id) {
                Some(ours) => theirs.last_modified > ours.last_modified,
                None => true,
            };
            if take {
                local.answers.insert(question.id.clone(), theirs.clone());
                remote_answers += 1;
            }
        }
    }

    local.revision = local.revision.max(remote.revision) + 1;
    local.last_modified = local.last_modified.max(remote.last_modified);

    tracing::debug!(
        attempt = %local.attempt_id,
        remote_answers,
        revision = local.revision,
        "snapshots reconciled"
    );

    Some(Reconciled {
        snapshot: local,
        resolution: Resolution::Merged { remote_answers },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::snapshot;
    use adaptest_core::model::{Answer, AnswerValue, Module, Question, QuestionKind};
    use adaptest_core::model::{Difficulty, Subject, TestDefinition};
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    fn graph() -> ModuleGraph {
        let question = |id: &str| Question {
            id: id.into(),
            kind: QuestionKind::Numeric,
            prompt: String::new(),
            options: vec![],
            correct_answer: "1".into(),
            explanation: String::new(),
            points: None,
            image: None,
        };
        ModuleGraph::build(TestDefinition {
            id: "sat-1".into(),
            name: "SAT".into(),
            description: String::new(),
            entry_module: None,
            modules: vec![Module {
                id: "m1".into(),
                name: "M1".into(),
                subject: Subject::Math,
                difficulty: Difficulty::Medium,
                order: 1,
                duration_secs: 300,
                break_after_secs: 0,
                passage: None,
                question_types: vec![],
                questions: vec![question("q1"), question("q2"), question("q3")],
                rules: vec![],
            }],
        })
        .unwrap()
    }

    fn answer(id: &str, value: &str, at: DateTime<Utc>) -> Answer {
        Answer {
            question_id: id.into(),
            question_index: 0,
            value: AnswerValue::Text(value.into()),
            time_spent_secs: 1,
            correct: None,
            points_earned: None,
            flagged: false,
            last_modified: at,
        }
    }

    #[test]
    fn one_side_missing() {
        let graph = graph();
        let id = Uuid::new_v4();
        assert!(reconcile(&graph, None, None).is_none());

        let only_local = reconcile(&graph, Some(snapshot(id, 1)), None).unwrap();
        assert_eq!(only_local.resolution, Resolution::LocalOnly);

        let only_remote = reconcile(&graph, None, Some(snapshot(id, 7))).unwrap();
        assert_eq!(only_remote.resolution, Resolution::RemoteOnly);
        assert_eq!(only_remote.snapshot.revision, 7);
    }

    #[test]
    fn merges_active_module_answers_by_last_write() {
        let graph = graph();
        let id = Uuid::new_v4();
        let t0 = Utc::now();

        let mut local = snapshot(id, 4);
        local.answers.insert("q1".into(), answer("q1", "local-new", t0 + Duration::seconds(10)));
        local.answers.insert("q2".into(), answer("q2", "local-old", t0));
        local.time_remaining_secs = 120;

        let mut remote = snapshot(id, 6);
        remote.answers.insert("q1".into(), answer("q1", "remote-old", t0));
        remote.answers.insert("q2".into(), answer("q2", "remote-new", t0 + Duration::seconds(5)));
        remote.answers.insert("q3".into(), answer("q3", "remote-only", t0));
        remote.time_remaining_secs = 200;

        let merged = reconcile(&graph, Some(local), Some(remote)).unwrap();
        assert_eq!(merged.resolution, Resolution::Merged { remote_answers: 2 });

        let answers = &merged.snapshot.answers;
        assert_eq!(answers["q1"].value, AnswerValue::Text("local-new".into()));
        assert_eq!(answers["q2"].value, AnswerValue::Text("remote-new".into()));
        assert_eq!(answers["q3"].value, AnswerValue::Text("remote-only".into()));
        assert_eq!(merged.snapshot.time_remaining_secs, 120);
        assert_eq!(merged.snapshot.revision, 7);
    }

    #[test]
    fn answer_cleared_offline_stays_cleared() {
        let graph = graph();
        let id = Uuid::new_v4();
        let t0 = Utc::now();

        let mut local = snapshot(id, 5);
        local.answers.insert("q1".into(), answer("q1", "", t0 + Duration::seconds(30)));
        local.answers.insert("q2".into(), answer("q2", "", t0));

        let mut remote = snapshot(id, 8);
        remote.answers.insert("q1".into(), answer("q1", "4", t0));
        // Answered again elsewhere after the local clear.
        remote.answers.insert("q2".into(), answer("q2", "7", t0 + Duration::seconds(45)));

        let merged = reconcile(&graph, Some(local), Some(remote)).unwrap();
        assert_eq!(merged.resolution, Resolution::Merged { remote_answers: 1 });
        let answers = &merged.snapshot.answers;
        assert!(answers["q1"].value.is_blank());
        assert_eq!(answers["q2"].value, AnswerValue::Text("7".into()));
    }

    #[test]
    fn ownership_mismatch_is_last_write_wins() {
        let graph = graph();
        let local = snapshot(Uuid::new_v4(), 9);
        let mut remote = snapshot(Uuid::new_v4(), 1);
        remote.last_modified = local.last_modified + Duration::minutes(1);

        let result = reconcile(&graph, Some(local), Some(remote.clone())).unwrap();
        assert_eq!(result.resolution, Resolution::SyncConflict { local_won: false });
        assert_eq!(result.snapshot, remote);
    }
}
