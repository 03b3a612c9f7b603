//! Core data model types for adaptest.
//!
//! These are the authored, immutable pieces of a test (modules, questions,
//! adaptive rules) plus the answer record a student produces while taking it.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject a module belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Math,
    English,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Math => write!(f, "math"),
            Subject::English => write!(f, "english"),
        }
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "math" | "maths" => Ok(Subject::Math),
            "english" | "reading" | "rw" => Ok(Subject::English),
            other => Err(format!("unknown subject: {other}")),
        }
    }
}

/// Difficulty tier of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// How a question is presented and answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    Numeric,
    Image,
    Passage,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::MultipleChoice => write!(f, "multiple_choice"),
            QuestionKind::Numeric => write!(f, "numeric"),
            QuestionKind::Image => write!(f, "image"),
            QuestionKind::Passage => write!(f, "passage"),
        }
    }
}

impl FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "multiple_choice" | "mcq" => Ok(QuestionKind::MultipleChoice),
            "numeric" | "grid_in" => Ok(QuestionKind::Numeric),
            "image" => Ok(QuestionKind::Image),
            "passage" => Ok(QuestionKind::Passage),
            other => Err(format!("unknown question kind: {other}")),
        }
    }
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    /// Option id, the value compared against `Question::correct_answer`.
    pub id: String,
    /// Display text.
    pub text: String,
}

/// A single authored question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique identifier, unique across the whole test.
    pub id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    /// Selectable options. Empty for free-response kinds.
    #[serde(default)]
    pub options: Vec<AnswerOption>,
    /// Option id for option-based questions, canonical value otherwise.
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    /// Point value override. Falls back to the module's per-kind value.
    #[serde(default)]
    pub points: Option<u32>,
    /// Image reference shown with the prompt.
    #[serde(default)]
    pub image: Option<String>,
}

impl Question {
    /// Returns `true` if the answer is picked from `options`.
    pub fn is_option_based(&self) -> bool {
        !self.options.is_empty()
    }
}

/// Per-kind question count and point value declared on a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTypeConfig {
    pub kind: QuestionKind,
    pub count: u32,
    pub points: u32,
}

/// Condition half of an adaptive rule.
///
/// New comparison operators are added as variants; the router only calls
/// [`RuleCondition::is_satisfied`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum RuleCondition {
    GreaterThan { threshold: f64 },
    LessThan { threshold: f64 },
}

impl RuleCondition {
    pub fn is_satisfied(&self, points: u32) -> bool {
        let points = f64::from(points);
        match *self {
            RuleCondition::GreaterThan { threshold } => points > threshold,
            RuleCondition::LessThan { threshold } => points < threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        match *self {
            RuleCondition::GreaterThan { threshold } | RuleCondition::LessThan { threshold } => {
                threshold
            }
        }
    }
}

impl fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCondition::GreaterThan { threshold } => write!(f, "score > {threshold}"),
            RuleCondition::LessThan { threshold } => write!(f, "score < {threshold}"),
        }
    }
}

/// Threshold rule attached to a source module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRule {
    pub condition: RuleCondition,
    /// Target when the condition holds.
    pub then_module: String,
    /// Target when the condition fails. `None` falls through to the next rule.
    #[serde(default)]
    pub else_module: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// A scored block of questions, the unit of adaptive routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub subject: Subject,
    pub difficulty: Difficulty,
    /// Ordering index. Rules may only point at modules with a larger order.
    pub order: u32,
    /// Time allowed for the module, in seconds.
    pub duration_secs: u64,
    /// Break taken after this module before the next one starts.
    #[serde(default)]
    pub break_after_secs: u64,
    /// Reading passage shared by the module's questions.
    #[serde(default)]
    pub passage: Option<String>,
    #[serde(default)]
    pub question_types: Vec<QuestionTypeConfig>,
    pub questions: Vec<Question>,
    /// Outbound rules, evaluated in this order.
    #[serde(default)]
    pub rules: Vec<AdaptiveRule>,
}

impl Module {
    /// Points a correct answer to `question` is worth.
    pub fn points_for(&self, question: &Question) -> u32 {
        question
            .points
            .or_else(|| {
                self.question_types
                    .iter()
                    .find(|t| t.kind == question.kind)
                    .map(|t| t.points)
            })
            .unwrap_or(1)
    }

    pub fn max_points(&self) -> u32 {
        self.questions.iter().map(|q| self.points_for(q)).sum()
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn question_index(&self, question_id: &str) -> Option<usize> {
        self.questions.iter().position(|q| q.id == question_id)
    }
}

/// Authored input for one test. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared entry module. Must agree with the graph's computed entry.
    #[serde(default)]
    pub entry_module: Option<String>,
    pub modules: Vec<Module>,
}

/// A submitted answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    #[serde(rename = "option")]
    Choice(String),
    Numeric(f64),
}

impl AnswerValue {
    /// Blank text counts as no answer.
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(s) | AnswerValue::Choice(s) => s.trim().is_empty(),
            AnswerValue::Numeric(n) => !n.is_finite(),
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            AnswerValue::Text(s) | AnswerValue::Choice(s) => Cow::Borrowed(s),
            AnswerValue::Numeric(n) => Cow::Owned(n.to_string()),
        }
    }
}

/// A student's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    /// Index of the question within its module.
    pub question_index: usize,
    pub value: AnswerValue,
    /// Seconds spent on the question, accumulated across re-answers.
    pub time_spent_secs: u64,
    /// Filled in when the module is finalized.
    #[serde(default)]
    pub correct: Option<bool>,
    /// Filled in when the module is finalized.
    #[serde(default)]
    pub points_earned: Option<u32>,
    #[serde(default)]
    pub flagged: bool,
    pub last_modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind, points: Option<u32>) -> Question {
        Question {
            id: "q1".into(),
            kind,
            prompt: "2 + 2?".into(),
            options: vec![],
            correct_answer: "4".into(),
            explanation: String::new(),
            points,
            image: None,
        }
    }

    #[test]
    fn subject_display_and_parse() {
        assert_eq!(Subject::Math.to_string(), "math");
        assert_eq!("English".parse::<Subject>().unwrap(), Subject::English);
        assert_eq!("rw".parse::<Subject>().unwrap(), Subject::English);
        assert!("history".parse::<Subject>().is_err());
    }

    #[test]
    fn question_kind_parse_aliases() {
        assert_eq!(
            "multiple-choice".parse::<QuestionKind>().unwrap(),
            QuestionKind::MultipleChoice
        );
        assert_eq!("MCQ".parse::<QuestionKind>().unwrap(), QuestionKind::MultipleChoice);
        assert_eq!("grid_in".parse::<QuestionKind>().unwrap(), QuestionKind::Numeric);
        assert!("essay".parse::<QuestionKind>().is_err());
    }

    #[test]
    fn points_fall_back_to_module_then_one() {
        let module = Module {
            id: "m".into(),
            name: "M".into(),
            subject: Subject::Math,
            difficulty: Difficulty::Medium,
            order: 1,
            duration_secs: 60,
            break_after_secs: 0,
            passage: None,
            question_types: vec![QuestionTypeConfig {
                kind: QuestionKind::Numeric,
                count: 1,
                points: 3,
            }],
            questions: vec![],
            rules: vec![],
        };
        assert_eq!(module.points_for(&question(QuestionKind::Numeric, Some(7))), 7);
        assert_eq!(module.points_for(&question(QuestionKind::Numeric, None)), 3);
        assert_eq!(module.points_for(&question(QuestionKind::Image, None)), 1);
    }

    #[test]
    fn condition_is_strict() {
        let gt = RuleCondition::GreaterThan { threshold: 70.0 };
        assert!(gt.is_satisfied(71));
        assert!(!gt.is_satisfied(70));
        let lt = RuleCondition::LessThan { threshold: 10.0 };
        assert!(lt.is_satisfied(9));
        assert!(!lt.is_satisfied(10));
        assert_eq!(gt.to_string(), "score > 70");
    }

    #[test]
    fn answer_value_serde_shape() {
        let json = serde_json::to_string(&AnswerValue::Choice("B".into())).unwrap();
        assert_eq!(json, r#"{"type":"option","value":"B"}"#);
        let back: AnswerValue = serde_json::from_str(r#"{"type":"numeric","value":2.5}"#).unwrap();
        assert_eq!(back, AnswerValue::Numeric(2.5));
        assert!(AnswerValue::Text("  ".into()).is_blank());
    }
}
