//! Per-module outcomes and the final result of an attempt.

use serde::{Deserialize, Serialize};

use crate::scorer::ModuleScore;

/// A finalized module: its score, where routing sent the student next, and
/// how long they spent in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutcome {
    pub module_id: String,
    pub score: ModuleScore,
    pub next_module: Option<String>,
    pub elapsed_secs: u64,
}

/// Final result of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub score: u32,
    pub max_score: u32,
    /// `score / max_score * 100`, 0 when nothing was scorable.
    pub percentage: f64,
    /// Seconds spent inside modules. Breaks are not counted.
    pub time_spent_secs: u64,
    pub questions_correct: usize,
    pub questions_incorrect: usize,
    pub questions_skipped: usize,
    /// Informational only; flags never change scoring.
    pub questions_flagged: usize,
    /// Scores of the modules taken, in visit order.
    pub modules: Vec<ModuleScore>,
}

impl TestResult {
    /// Aggregate the outcomes of every module taken.
    pub fn from_outcomes(outcomes: &[ModuleOutcome], questions_flagged: usize) -> Self {
        let score = outcomes.iter().map(|o| o.score.total_points).sum::<u32>();
        let max_score = outcomes.iter().map(|o| o.score.max_points).sum::<u32>();
        let percentage = if max_score == 0 {
            0.0
        } else {
            f64::from(score) / f64::from(max_score) * 100.0
        };

        Self {
            score,
            max_score,
            percentage,
            time_spent_secs: outcomes.iter().map(|o| o.elapsed_secs).sum(),
            questions_correct: outcomes.iter().map(|o| o.score.correct_count()).sum(),
            questions_incorrect: outcomes.iter().map(|o| o.score.incorrect_count()).sum(),
            questions_skipped: outcomes.iter().map(|o| o.score.skipped_count()).sum(),
            questions_flagged,
            modules: outcomes.iter().map(|o| o.score.clone()).collect(),
        }
    }

    pub fn question_count(&self) -> usize {
        self.questions_correct + self.questions_incorrect + self.questions_skipped
    }
}
