//! Serializable session state exchanged between local and remote stores.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Answer;
use crate::session::Phase;

/// A module the student has finished.
///
/// Scores and routing decisions are not stored; resume recomputes them from
/// the answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedModule {
    pub module_id: String,
    pub elapsed_secs: u64,
}

/// Point-in-time state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub attempt_id: Uuid,
    pub test_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub phase: Phase,
    #[serde(default)]
    pub current_module: Option<String>,
    #[serde(default)]
    pub current_question: usize,
    #[serde(default)]
    pub time_remaining_secs: u64,
    /// Answers keyed by question id.
    #[serde(default)]
    pub answers: BTreeMap<String, Answer>,
    /// Flagged question ids.
    #[serde(default)]
    pub flagged: BTreeSet<String>,
    #[serde(default)]
    pub completed_modules: Vec<CompletedModule>,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Incremented on every mutation; orders snapshots of one attempt.
    #[serde(default)]
    pub revision: u64,
    pub last_modified: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl SessionSnapshot {
    /// `true` if `self` was taken after `other`.
    pub fn is_newer_than(&self, other: &SessionSnapshot) -> bool {
        (self.revision, self.last_modified) > (other.revision, other.last_modified)
    }

    pub fn is_finished(&self) -> bool {
        self.submitted || matches!(self.phase, Phase::Submitted | Phase::Abandoned)
    }
}
