//! The session state machine.
//!
//! A [`Session`] owns one student's attempt at a test. Every mutation goes
//! through a method here; the module graph is shared read-only through an
//! `Arc`. Methods that fail leave the session untouched.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::graph::ModuleGraph;
use crate::model::{Answer, AnswerValue, Module};
use crate::result::{ModuleOutcome, TestResult};
use crate::router;
use crate::scorer::{self, ModuleScore};
use crate::snapshot::{CompletedModule, SessionSnapshot};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    InModule,
    /// Between modules. The upcoming module is already the current module.
    InBreak {
        remaining_secs: u64,
    },
    Submitted,
    Abandoned,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Submitted | Phase::Abandoned)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::InModule => write!(f, "in a module"),
            Phase::InBreak { .. } => write!(f, "on a break"),
            Phase::Submitted => write!(f, "submitted"),
            Phase::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// What `finalize_module` (or `submit`) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The next module started immediately.
    NextModule { module_id: String },
    /// A break started; `module_id` follows it.
    Break {
        module_id: String,
        remaining_secs: u64,
    },
    /// No next module: the attempt is over.
    Submitted,
    /// The module had already been finalized; nothing changed.
    AlreadyFinalized,
}

/// What a `tick` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_secs: u64 },
    /// Time ran out and the module was finalized.
    TimedOut(Transition),
    OnBreak { remaining_secs: u64 },
    BreakOver { module_id: String },
    /// The session is finished; ticks are ignored.
    Idle,
}

/// Answered/flagged status of one question in the current module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionStatus {
    pub index: usize,
    pub question_id: String,
    pub answered: bool,
    pub flagged: bool,
}

/// Read-only projection for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub attempt_id: Uuid,
    pub test_id: String,
    pub phase: Phase,
    pub module_id: Option<String>,
    pub module_name: Option<String>,
    pub question_index: usize,
    pub question_count: usize,
    pub time_remaining_secs: u64,
    pub questions: Vec<QuestionStatus>,
    pub modules_completed: usize,
}

/// Something `resume` found wrong in a snapshot and repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    /// The completed-module path disagrees with what routing produces.
    PathDiverged {
        expected: Option<String>,
        found: String,
    },
    /// The current module is not the one routing leads to.
    UnexpectedModule {
        expected: String,
        found: Option<String>,
    },
    /// Snapshot claims submission but routing has modules left.
    PrematureSubmission { next_module: String },
    /// All modules are finalized but the snapshot was not marked submitted.
    SubmissionRestored,
    QuestionOutOfRange { index: usize, len: usize },
    TimeInflated { persisted: u64, allowed: u64 },
    /// Answers for questions in modules the student never reached.
    StrayAnswers(Vec<String>),
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::PathDiverged { expected, found } => write!(
                f,
                "completed module {found} does not follow routing (expected {})",
                expected.as_deref().unwrap_or("end of test")
            ),
            Repair::UnexpectedModule { expected, found } => write!(
                f,
                "current module {} is not the routed module {expected}",
                found.as_deref().unwrap_or("<none>")
            ),
            Repair::PrematureSubmission { next_module } => {
                write!(f, "marked submitted but {next_module} is still ahead")
            }
            Repair::SubmissionRestored => write!(f, "all modules finished but not marked submitted"),
            Repair::QuestionOutOfRange { index, len } => {
                write!(f, "question index {index} out of range for {len} questions")
            }
            Repair::TimeInflated { persisted, allowed } => {
                write!(f, "time remaining {persisted}s exceeds the allowed {allowed}s")
            }
            Repair::StrayAnswers(ids) => {
                write!(f, "dropped answers for unvisited questions: {}", ids.join(", "))
            }
        }
    }
}

/// A session rebuilt from a snapshot, with any repairs that were needed.
#[derive(Debug)]
pub struct Resumed {
    pub session: Session,
    pub repairs: Vec<Repair>,
}

impl Resumed {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }
}

/// One student's attempt at a test.
#[derive(Debug, Clone)]
pub struct Session {
    graph: Arc<ModuleGraph>,
    attempt_id: Uuid,
    phase: Phase,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    current_module: Option<String>,
    current_question: usize,
    time_remaining_secs: u64,
    answers: BTreeMap<String, Answer>,
    flagged: BTreeSet<String>,
    completed: Vec<ModuleOutcome>,
    result: Option<TestResult>,
    auto_save: bool,
    revision: u64,
    last_modified: DateTime<Utc>,
}

impl Session {
    /// A session that has not started yet.
    pub fn new(graph: Arc<ModuleGraph>, attempt_id: Uuid) -> Self {
        Self {
            graph,
            attempt_id,
            phase: Phase::NotStarted,
            started_at: None,
            ended_at: None,
            current_module: None,
            current_question: 0,
            time_remaining_secs: 0,
            answers: BTreeMap::new(),
            flagged: BTreeSet::new(),
            completed: Vec::new(),
            result: None,
            auto_save: true,
            revision: 0,
            last_modified: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Enter the graph's entry module.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::NotStarted {
            return Err(self.invalid("start"));
        }

        let now = Utc::now();
        let entry = self.graph.entry();
        let (entry_id, duration) = (entry.id.clone(), entry.duration_secs);

        self.started_at = Some(now);
        self.current_module = Some(entry_id);
        self.current_question = 0;
        self.time_remaining_secs = duration;
        self.phase = Phase::InModule;
        self.touch(now);

        tracing::info!(
            attempt = %self.attempt_id,
            test = %self.graph.test_id(),
            module = ?self.current_module,
            "session started"
        );
        Ok(())
    }

    /// Record (or overwrite) the answer to a question of the current module.
    pub fn record_answer(
        &mut self,
        index: usize,
        value: AnswerValue,
        time_spent_secs: u64,
    ) -> Result<(), SessionError> {
        let question_id = self.question_at("record an answer", index)?;
        let now = Utc::now();
        let flagged = self.flagged.contains(&question_id);

        match self.answers.entry(question_id) {
            Entry::Occupied(mut entry) => {
                let answer = entry.get_mut();
                answer.value = value;
                answer.time_spent_secs += time_spent_secs;
                answer.flagged = flagged;
                answer.last_modified = now;
            }
            Entry::Vacant(entry) => {
                let question_id = entry.key().clone();
                entry.insert(Answer {
                    question_id,
                    question_index: index,
                    value,
                    time_spent_secs,
                    correct: None,
                    points_earned: None,
                    flagged,
                    last_modified: now,
                });
            }
        }

        self.touch(now);
        Ok(())
    }

    /// Clear the answer to a question of the current module. Returns `true`
    /// if there was an answer to clear.
    ///
    /// The entry stays with a blank value and a new timestamp, so merging
    /// with an older copy that still holds the answer keeps it cleared.
    /// Blank answers score as unanswered.
    pub fn clear_answer(&mut self, index: usize) -> Result<bool, SessionError> {
        let question_id = self.question_at("clear an answer", index)?;
        let Some(answer) = self
            .answers
            .get_mut(&question_id)
            .filter(|a| !a.value.is_blank())
        else {
            return Ok(false);
        };

        let now = Utc::now();
        answer.value = AnswerValue::Text(String::new());
        answer.last_modified = now;
        self.touch(now);
        Ok(true)
    }

    /// Toggle the review flag on a question. Returns the new flag state.
    pub fn toggle_flag(&mut self, index: usize) -> Result<bool, SessionError> {
        let question_id = self.question_at("flag a question", index)?;

        let flagged = if self.flagged.remove(&question_id) {
            false
        } else {
            self.flagged.insert(question_id.clone());
            true
        };
        if let Some(answer) = self.answers.get_mut(&question_id) {
            answer.flagged = flagged;
        }

        self.touch(Utc::now());
        Ok(flagged)
    }

    /// Move to the next question; stays on the last one.
    pub fn advance_question(&mut self) -> Result<usize, SessionError> {
        let len = self.active_module("navigate")?.question_count();
        let next = (self.current_question + 1).min(len.saturating_sub(1));
        self.move_to(next);
        Ok(next)
    }

    /// Move to the previous question; stays on the first one.
    pub fn previous_question(&mut self) -> Result<usize, SessionError> {
        self.active_module("navigate")?;
        let previous = self.current_question.saturating_sub(1);
        self.move_to(previous);
        Ok(previous)
    }

    pub fn set_current_question(&mut self, index: usize) -> Result<(), SessionError> {
        self.question_at("navigate", index)?;
        self.move_to(index);
        Ok(())
    }

    /// Let `elapsed_secs` of active time pass.
    ///
    /// Running out of module time finalizes the module; running out of break
    /// time starts the next module.
    pub fn tick(&mut self, elapsed_secs: u64) -> Result<TickOutcome, SessionError> {
        match self.phase {
            Phase::NotStarted => Err(self.invalid("tick")),
            Phase::Submitted | Phase::Abandoned => Ok(TickOutcome::Idle),
            Phase::InModule => {
                if elapsed_secs == 0 {
                    return Ok(TickOutcome::Running {
                        remaining_secs: self.time_remaining_secs,
                    });
                }
                self.time_remaining_secs = self.time_remaining_secs.saturating_sub(elapsed_secs);
                self.touch(Utc::now());

                if self.time_remaining_secs == 0 {
                    tracing::info!(
                        attempt = %self.attempt_id,
                        module = ?self.current_module,
                        "module time expired, finalizing"
                    );
                    let transition = self.finalize_current()?;
                    Ok(TickOutcome::TimedOut(transition))
                } else {
                    Ok(TickOutcome::Running {
                        remaining_secs: self.time_remaining_secs,
                    })
                }
            }
            Phase::InBreak { remaining_secs } => {
                if elapsed_secs == 0 {
                    return Ok(TickOutcome::OnBreak { remaining_secs });
                }
                let remaining_secs = remaining_secs.saturating_sub(elapsed_secs);
                if remaining_secs == 0 {
                    let module_id = self.begin_after_break();
                    Ok(TickOutcome::BreakOver { module_id })
                } else {
                    self.phase = Phase::InBreak { remaining_secs };
                    self.touch(Utc::now());
                    Ok(TickOutcome::OnBreak { remaining_secs })
                }
            }
        }
    }

    /// Score module `module_id` and route to the next one.
    ///
    /// Safe to call more than once: a module that is already in the
    /// completed path returns [`Transition::AlreadyFinalized`] and changes
    /// nothing. Naming the module keeps a late duplicate (a timeout racing a
    /// manual submit, or a request replayed after a reload) from finalizing
    /// the module that replaced it.
    pub fn finalize_module(&mut self, module_id: &str) -> Result<Transition, SessionError> {
        if matches!(self.phase, Phase::NotStarted | Phase::Abandoned) {
            return Err(self.invalid("finalize a module"));
        }
        if self.completed.iter().any(|o| o.module_id == module_id) {
            return Ok(Transition::AlreadyFinalized);
        }
        match self.phase {
            Phase::InModule if self.current_module.as_deref() == Some(module_id) => {
                self.finalize_current()
            }
            _ => Err(SessionError::NotActiveModule {
                requested: module_id.to_string(),
                phase: self.phase,
            }),
        }
    }

    /// Cut a break short and start the next module.
    pub fn end_break(&mut self) -> Result<String, SessionError> {
        match self.phase {
            Phase::InBreak { .. } => Ok(self.begin_after_break()),
            _ => Err(self.invalid("end a break")),
        }
    }

    /// Submit the whole attempt, finalizing every remaining module.
    ///
    /// Modules the student never reached are scored with whatever answers
    /// exist for them (normally none).
    pub fn submit(&mut self) -> Result<TestResult, SessionError> {
        match self.phase {
            Phase::Submitted => {}
            Phase::NotStarted | Phase::Abandoned => return Err(self.invalid("submit")),
            Phase::InModule | Phase::InBreak { .. } => {
                // Bounded: routing only moves to modules with a larger order.
                loop {
                    if matches!(self.phase, Phase::InBreak { .. }) {
                        self.phase = Phase::InModule;
                    }
                    if self.finalize_current()? == Transition::Submitted {
                        break;
                    }
                }
            }
        }
        self.result.clone().ok_or_else(|| self.invalid("submit"))
    }

    /// Give up on the attempt. Reachable from any non-terminal phase.
    pub fn abandon(&mut self) -> Result<(), SessionError> {
        if self.phase.is_terminal() {
            return Err(self.invalid("abandon"));
        }
        let now = Utc::now();
        self.phase = Phase::Abandoned;
        self.ended_at = Some(now);
        self.touch(now);
        tracing::info!(attempt = %self.attempt_id, "session abandoned");
        Ok(())
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        if self.auto_save != enabled {
            self.auto_save = enabled;
            self.touch(Utc::now());
        }
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    pub fn view(&self) -> SessionView {
        let module = self.current_module();
        let questions = module
            .map(|m| {
                m.questions
                    .iter()
                    .enumerate()
                    .map(|(index, q)| QuestionStatus {
                        index,
                        question_id: q.id.clone(),
                        answered: self
                            .answers
                            .get(&q.id)
                            .is_some_and(|a| !a.value.is_blank()),
                        flagged: self.flagged.contains(&q.id),
                    })
                    .collect()
            })
            .unwrap_or_default();

        SessionView {
            attempt_id: self.attempt_id,
            test_id: self.graph.test_id().to_string(),
            phase: self.phase,
            module_id: module.map(|m| m.id.clone()),
            module_name: module.map(|m| m.name.clone()),
            question_index: self.current_question,
            question_count: module.map(Module::question_count).unwrap_or(0),
            time_remaining_secs: self.time_remaining_secs,
            questions,
            modules_completed: self.completed.len(),
        }
    }

    /// Speculative score of the current module. Does not change the session.
    pub fn preview_score(&self) -> Option<ModuleScore> {
        match self.phase {
            Phase::InModule | Phase::InBreak { .. } => self
                .current_module()
                .map(|m| scorer::score(m, &self.answers)),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            attempt_id: self.attempt_id,
            test_id: self.graph.test_id().to_string(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            phase: self.phase,
            current_module: self.current_module.clone(),
            current_question: self.current_question,
            time_remaining_secs: self.time_remaining_secs,
            answers: self.answers.clone(),
            flagged: self.flagged.clone(),
            completed_modules: self
                .completed
                .iter()
                .map(|o| CompletedModule {
                    module_id: o.module_id.clone(),
                    elapsed_secs: o.elapsed_secs,
                })
                .collect(),
            submitted: self.phase == Phase::Submitted,
            auto_save: self.auto_save,
            revision: self.revision,
            last_modified: self.last_modified,
        }
    }

    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_module(&self) -> Option<&Module> {
        self.current_module
            .as_deref()
            .and_then(|id| self.graph.module(id))
    }

    pub fn current_question(&self) -> usize {
        self.current_question
    }

    pub fn time_remaining_secs(&self) -> u64 {
        self.time_remaining_secs
    }

    pub fn answers(&self) -> &BTreeMap<String, Answer> {
        &self.answers
    }

    pub fn answer(&self, question_id: &str) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn is_flagged(&self, question_id: &str) -> bool {
        self.flagged.contains(question_id)
    }

    pub fn completed(&self) -> &[ModuleOutcome] {
        &self.completed
    }

    /// Ids of the modules taken so far, in order.
    pub fn path(&self) -> Vec<&str> {
        self.completed.iter().map(|o| o.module_id.as_str()).collect()
    }

    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Rebuild a session from a snapshot.
    ///
    /// Scores and routing are recomputed from the persisted answers; a
    /// snapshot that disagrees with them is repaired by restarting at the
    /// last module boundary that checks out. Only a snapshot of a different
    /// test is rejected.
    pub fn resume(
        graph: Arc<ModuleGraph>,
        snapshot: SessionSnapshot,
    ) -> Result<Resumed, SessionError> {
        if snapshot.test_id != graph.test_id() {
            return Err(SessionError::TestMismatch {
                expected: graph.test_id().to_string(),
                found: snapshot.test_id,
            });
        }

        let mut session = Session::new(Arc::clone(&graph), snapshot.attempt_id);
        session.auto_save = snapshot.auto_save;
        session.revision = snapshot.revision;
        session.last_modified = snapshot.last_modified;
        let mut repairs = Vec::new();

        if snapshot.phase == Phase::NotStarted {
            if let Some(done) = snapshot.completed_modules.first() {
                repairs.push(Repair::PathDiverged {
                    expected: None,
                    found: done.module_id.clone(),
                });
            }
            if !snapshot.answers.is_empty() {
                repairs.push(Repair::StrayAnswers(snapshot.answers.keys().cloned().collect()));
            }
            return Ok(session.finish_resume(repairs));
        }

        session.started_at = snapshot.started_at.or(Some(snapshot.last_modified));

        // Re-walk the completed path from the entry module.
        let mut cursor = Some(graph.entry().id.clone());
        for done in &snapshot.completed_modules {
            let Some(expected) = cursor.take() else {
                repairs.push(Repair::PathDiverged {
                    expected: None,
                    found: done.module_id.clone(),
                });
                break;
            };
            if done.module_id != expected {
                repairs.push(Repair::PathDiverged {
                    expected: Some(expected.clone()),
                    found: done.module_id.clone(),
                });
                cursor = Some(expected);
                break;
            }
            let Some(module) = graph.module(&expected) else {
                break;
            };
            let score = scorer::score(module, &snapshot.answers);
            let next = router::next_module(module, &score).map(String::from);
            session.completed.push(ModuleOutcome {
                module_id: expected,
                score,
                next_module: next.clone(),
                elapsed_secs: done.elapsed_secs.min(module.duration_secs),
            });
            cursor = next;
        }
        let path_intact = repairs.is_empty();

        // Keep answers and flags only for modules the student reached.
        let reachable: BTreeSet<&str> = session
            .completed
            .iter()
            .map(|o| o.module_id.as_str())
            .chain(cursor.as_deref())
            .collect();
        let mut stray = Vec::new();
        for (question_id, mut answer) in snapshot.answers {
            let owner = graph
                .module_of_question(&question_id)
                .filter(|m| reachable.contains(m.id.as_str()));
            match owner.and_then(|m| m.question_index(&question_id)) {
                Some(index) => {
                    answer.question_index = index;
                    session.answers.insert(question_id, answer);
                }
                None => stray.push(question_id),
            }
        }
        if !stray.is_empty() {
            repairs.push(Repair::StrayAnswers(stray));
        }
        session.flagged = snapshot
            .flagged
            .into_iter()
            .filter(|id| {
                graph
                    .module_of_question(id)
                    .is_some_and(|m| reachable.contains(m.id.as_str()))
            })
            .collect();

        let outcomes = session.completed.clone();
        for outcome in &outcomes {
            session.freeze_answers(&outcome.score);
        }

        match cursor {
            None => {
                if snapshot.phase == Phase::Abandoned {
                    session.phase = Phase::Abandoned;
                    session.ended_at = snapshot.ended_at;
                } else {
                    if !snapshot.submitted && snapshot.phase != Phase::Submitted {
                        repairs.push(Repair::SubmissionRestored);
                    }
                    let ended = snapshot.ended_at.unwrap_or(snapshot.last_modified);
                    session.finish(ended);
                }
            }
            Some(cursor_id) => {
                let Some(module) = graph.module(&cursor_id) else {
                    return Ok(session.finish_resume(repairs));
                };
                session.current_module = Some(cursor_id.clone());

                let position_trusted = path_intact
                    && snapshot.current_module.as_deref() == Some(cursor_id.as_str());

                if snapshot.submitted || snapshot.phase == Phase::Submitted {
                    repairs.push(Repair::PrematureSubmission {
                        next_module: cursor_id.clone(),
                    });
                    session.restart_module(module);
                } else if !position_trusted {
                    repairs.push(Repair::UnexpectedModule {
                        expected: cursor_id.clone(),
                        found: snapshot.current_module.clone(),
                    });
                    session.restart_module(module);
                } else {
                    session.restore_position(
                        module,
                        snapshot.phase,
                        snapshot.current_question,
                        snapshot.time_remaining_secs,
                        &mut repairs,
                    );
                }

                if snapshot.phase == Phase::Abandoned {
                    session.phase = Phase::Abandoned;
                    session.ended_at = snapshot.ended_at;
                }
            }
        }

        Ok(session.finish_resume(repairs))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            phase: self.phase,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.last_modified = now.max(self.last_modified);
    }

    fn active_module(&self, operation: &'static str) -> Result<&Module, SessionError> {
        if self.phase != Phase::InModule {
            return Err(self.invalid(operation));
        }
        self.current_module().ok_or_else(|| self.invalid(operation))
    }

    /// Id of the question at `index` in the active module.
    fn question_at(&self, operation: &'static str, index: usize) -> Result<String, SessionError> {
        let module = self.active_module(operation)?;
        module
            .question(index)
            .map(|q| q.id.clone())
            .ok_or(SessionError::OutOfRange {
                index,
                len: module.question_count(),
            })
    }

    fn move_to(&mut self, index: usize) {
        if self.current_question != index {
            self.current_question = index;
            self.touch(Utc::now());
        }
    }

    fn finalize_current(&mut self) -> Result<Transition, SessionError> {
        let graph = Arc::clone(&self.graph);
        let module = self
            .current_module
            .as_deref()
            .and_then(|id| graph.module(id))
            .ok_or_else(|| self.invalid("finalize a module"))?;

        let score = scorer::score(module, &self.answers);
        self.freeze_answers(&score);
        let next = router::next_module(module, &score).and_then(|id| graph.module(id));
        let elapsed_secs = module.duration_secs.saturating_sub(self.time_remaining_secs);

        tracing::info!(
            attempt = %self.attempt_id,
            module = %module.id,
            points = score.total_points,
            max = score.max_points,
            next = ?next.map(|m| &m.id),
            "module finalized"
        );

        self.completed.push(ModuleOutcome {
            module_id: module.id.clone(),
            score,
            next_module: next.map(|m| m.id.clone()),
            elapsed_secs,
        });

        let now = Utc::now();
        let transition = match next {
            Some(next) => {
                self.current_module = Some(next.id.clone());
                self.current_question = 0;
                self.time_remaining_secs = next.duration_secs;
                if module.break_after_secs > 0 {
                    self.phase = Phase::InBreak {
                        remaining_secs: module.break_after_secs,
                    };
                    Transition::Break {
                        module_id: next.id.clone(),
                        remaining_secs: module.break_after_secs,
                    }
                } else {
                    self.phase = Phase::InModule;
                    Transition::NextModule {
                        module_id: next.id.clone(),
                    }
                }
            }
            None => {
                self.finish(now);
                Transition::Submitted
            }
        };

        self.touch(now);
        Ok(transition)
    }

    /// Write computed correctness onto the answers of a finalized module.
    fn freeze_answers(&mut self, score: &ModuleScore) {
        for question in &score.per_question {
            if let Some(answer) = self.answers.get_mut(&question.question_id) {
                answer.correct = Some(question.correct);
                answer.points_earned = Some(question.points_earned);
                answer.flagged = self.flagged.contains(&question.question_id);
            }
        }
    }

    fn begin_after_break(&mut self) -> String {
        self.phase = Phase::InModule;
        self.current_question = 0;
        self.touch(Utc::now());
        let module_id = self.current_module.clone().unwrap_or_default();
        tracing::info!(attempt = %self.attempt_id, module = %module_id, "break over");
        module_id
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.phase = Phase::Submitted;
        self.ended_at = Some(now);
        self.current_module = None;
        self.current_question = 0;
        self.time_remaining_secs = 0;
        let result = TestResult::from_outcomes(&self.completed, self.flagged.len());
        tracing::info!(
            attempt = %self.attempt_id,
            score = result.score,
            max = result.max_score,
            "attempt submitted"
        );
        self.result = Some(result);
    }

    fn restart_module(&mut self, module: &Module) {
        self.phase = Phase::InModule;
        self.current_question = 0;
        self.time_remaining_secs = module.duration_secs;
    }

    fn restore_position(
        &mut self,
        module: &Module,
        phase: Phase,
        question: usize,
        time_remaining_secs: u64,
        repairs: &mut Vec<Repair>,
    ) {
        self.current_question = question;
        if question >= module.question_count() {
            repairs.push(Repair::QuestionOutOfRange {
                index: question,
                len: module.question_count(),
            });
            self.current_question = 0;
        }

        self.time_remaining_secs = time_remaining_secs;
        if time_remaining_secs > module.duration_secs {
            repairs.push(Repair::TimeInflated {
                persisted: time_remaining_secs,
                allowed: module.duration_secs,
            });
            self.time_remaining_secs = module.duration_secs;
        }

        self.phase = match phase {
            Phase::InBreak { remaining_secs } => {
                let allowed = self
                    .completed
                    .last()
                    .and_then(|o| self.graph.module(&o.module_id))
                    .map(|m| m.break_after_secs)
                    .unwrap_or(0);
                if allowed == 0 {
                    Phase::InModule
                } else {
                    Phase::InBreak {
                        remaining_secs: remaining_secs.min(allowed),
                    }
                }
            }
            _ => Phase::InModule,
        };
    }

    fn finish_resume(mut self, repairs: Vec<Repair>) -> Resumed {
        if !repairs.is_empty() {
            for repair in &repairs {
                tracing::warn!(attempt = %self.attempt_id, "resume repaired snapshot: {repair}");
            }
            self.touch(Utc::now());
        }
        Resumed {
            session: self,
            repairs,
        }
    }
}
