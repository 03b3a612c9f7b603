//! Error types for graph construction and session transitions.
//!
//! Defined in `adaptest-core` so the sync layer can match on them without
//! string inspection.

use thiserror::Error;

use crate::session::Phase;

/// A test definition that cannot be turned into a module graph.
///
/// Raised when a test is loaded, never while a student is taking it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("test has no modules")]
    EmptyTest,

    #[error("duplicate module id: {0}")]
    DuplicateModule(String),

    #[error("duplicate question id: {0}")]
    DuplicateQuestion(String),

    #[error("module {0} has no questions")]
    EmptyModule(String),

    #[error("module {0} has a zero duration")]
    ZeroDuration(String),

    #[error("rule on module {module} targets unknown module {target}")]
    UnknownTarget { module: String, target: String },

    /// Rule targets must have a strictly larger order, which keeps routing acyclic.
    #[error("rule on module {module} (order {module_order}) targets {target} (order {target_order})")]
    NonIncreasingOrder {
        module: String,
        module_order: u32,
        target: String,
        target_order: u32,
    },

    #[error("rule on module {0} has a non-finite threshold")]
    InvalidThreshold(String),

    #[error("no entry module: every module is the target of a rule")]
    NoEntry,

    #[error("multiple entry modules: {}", .0.join(", "))]
    MultipleEntries(Vec<String>),

    #[error("declared entry module {declared} does not match computed entry {computed}")]
    EntryMismatch { declared: String, computed: String },

    #[error("question {question}: {message}")]
    InvalidQuestion { question: String, message: String },
}

/// A session operation that was rejected. The session is left unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    #[error("cannot finalize module {requested}: it is not the module in progress (session is {phase})")]
    NotActiveModule { requested: String, phase: Phase },

    #[error("question index {index} is out of range (module has {len} questions)")]
    OutOfRange { index: usize, len: usize },

    #[error("snapshot belongs to test {found}, expected {expected}")]
    TestMismatch { expected: String, found: String },
}

impl SessionError {
    /// Returns `true` for errors caused by calling an operation at the wrong time.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}
