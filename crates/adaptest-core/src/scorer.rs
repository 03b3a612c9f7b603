//! Point-sum scoring of a module.
//!
//! [`score`] is pure: it reads the module and the answers and returns a
//! fresh [`ModuleScore`], so it can be called for live previews as often as
//! needed without touching session state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Answer, AnswerValue, Module, Question, QuestionKind};

const NUMERIC_TOLERANCE: f64 = 1e-9;

/// Outcome of scoring one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScore {
    pub module_id: String,
    pub total_points: u32,
    pub max_points: u32,
    /// One entry per question, in module order.
    pub per_question: Vec<QuestionScore>,
}

/// Outcome for a single question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: String,
    pub answered: bool,
    /// Unanswered questions are incorrect, never ungraded.
    pub correct: bool,
    pub points_earned: u32,
}

impl ModuleScore {
    pub fn correct_count(&self) -> usize {
        self.per_question.iter().filter(|q| q.correct).count()
    }

    pub fn incorrect_count(&self) -> usize {
        self.per_question
            .iter()
            .filter(|q| q.answered && !q.correct)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.per_question.iter().filter(|q| !q.answered).count()
    }

    /// Share of available points earned, in `[0.0, 1.0]`.
    pub fn ratio(&self) -> f64 {
        if self.max_points == 0 {
            0.0
        } else {
            f64::from(self.total_points) / f64::from(self.max_points)
        }
    }
}

/// Score `module` against `answers` (keyed by question id).
///
/// Answers for questions outside the module are ignored.
pub fn score(module: &Module, answers: &BTreeMap<String, Answer>) -> ModuleScore {
    let mut total_points = 0;
    let mut max_points = 0;

    let per_question = module
        .questions
        .iter()
        .map(|question| {
            let points = module.points_for(question);
            max_points += points;

            let submitted = answers
                .get(&question.id)
                .map(|a| &a.value)
                .filter(|v| !v.is_blank());

            let correct = submitted.is_some_and(|value| is_correct(question, value));
            let points_earned = if correct { points } else { 0 };
            total_points += points_earned;

            QuestionScore {
                question_id: question.id.clone(),
                answered: submitted.is_some(),
                correct,
                points_earned,
            }
        })
        .collect();

    ModuleScore {
        module_id: module.id.clone(),
        total_points,
        max_points,
        per_question,
    }
}

/// Compare a submitted value with the question's correct answer.
pub fn is_correct(question: &Question, value: &AnswerValue) -> bool {
    if question.is_option_based() {
        return value.as_text() == question.correct_answer.as_str();
    }

    if question.kind == QuestionKind::Numeric {
        let expected = parse_numeric(&question.correct_answer);
        let submitted = match value {
            AnswerValue::Numeric(n) => Some(*n),
            AnswerValue::Text(s) | AnswerValue::Choice(s) => parse_numeric(s),
        };
        if let (Some(expected), Some(submitted)) = (expected, submitted) {
            return (expected - submitted).abs() <= NUMERIC_TOLERANCE;
        }
    }

    value.as_text().trim() == question.correct_answer.trim()
}

/// Parse a free-response number into its canonical value.
///
/// Accepts surrounding whitespace, a leading `+`, thousands separators,
/// trailing zeros and simple `a/b` fractions.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let value = match cleaned.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => cleaned.parse().ok()?,
    };

    value.is_finite().then_some(value)
}
