//! A running attempt: one session wired to the local store and sync queue.

use std::sync::Arc;

use adaptest_core::model::AnswerValue;
use adaptest_core::result::TestResult;
use adaptest_core::session::{Phase, Session, TickOutcome, Transition};

use crate::error::AttemptError;
use crate::queue::SyncQueue;
use crate::store::LocalStore;

/// A user action or timer event applied to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RecordAnswer {
        index: usize,
        value: AnswerValue,
        time_spent_secs: u64,
    },
    ClearAnswer {
        index: usize,
    },
    ToggleFlag {
        index: usize,
    },
    NextQuestion,
    PreviousQuestion,
    GoToQuestion {
        index: usize,
    },
    /// Finalize `module_id`. A module already in the completed path is a
    /// no-op, so a replayed or racing request cannot skip the next module.
    FinalizeModule {
        module_id: String,
    },
    EndBreak,
    Submit,
    Abandon,
    SetAutoSave(bool),
    Tick {
        elapsed_secs: u64,
    },
}

impl Command {
    fn is_tick(&self) -> bool {
        matches!(self, Command::Tick { .. })
    }
}

/// Result of a successfully applied [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Answered,
    Cleared(bool),
    Flagged(bool),
    Moved(usize),
    Transition(Transition),
    BreakEnded(String),
    Submitted(TestResult),
    Abandoned,
    AutoSave(bool),
    Tick(TickOutcome),
}

/// Owns one [`Session`] and persists it after every mutation.
///
/// The snapshot is written to the local store before a command returns.
/// Remote sync is scheduled on the queue: module boundaries, submission and
/// abandonment always, answer-level changes only while auto-save is on.
pub struct AttemptRunner {
    session: Session,
    local: Arc<dyn LocalStore>,
    queue: Arc<SyncQueue>,
}

impl AttemptRunner {
    pub fn new(session: Session, local: Arc<dyn LocalStore>, queue: Arc<SyncQueue>) -> Self {
        Self {
            session,
            local,
            queue,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Apply one command, then persist if it changed anything.
    ///
    /// The command runs against a copy of the session that replaces the
    /// live one only after the local save succeeds. On any error the
    /// session is exactly as it was.
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome, AttemptError> {
        let settings_change = matches!(command, Command::SetAutoSave(_));
        let mut next = self.session.clone();
        let outcome = dispatch(&mut next, command)?;

        if next.revision() != self.session.revision() {
            let boundary = settings_change
                || !same_phase(self.session.phase(), next.phase())
                || self.session.current_module().map(|m| m.id.as_str())
                    != next.current_module().map(|m| m.id.as_str());
            self.write(&next, boundary)?;
        }
        self.session = next;
        Ok(outcome)
    }

    /// Apply a batch of commands that arrived within one tick.
    ///
    /// User commands run first, in order, then ticks. An answer recorded in
    /// the same tick that times its module out is therefore scored.
    pub fn apply_batch(
        &mut self,
        commands: Vec<Command>,
    ) -> Vec<Result<CommandOutcome, AttemptError>> {
        let (ticks, user): (Vec<Command>, Vec<Command>) =
            commands.into_iter().partition(Command::is_tick);
        user.into_iter()
            .chain(ticks)
            .map(|command| self.apply(command))
            .collect()
    }

    /// Write the current snapshot locally and schedule a remote push.
    ///
    /// `force_remote` schedules the push even with auto-save off.
    pub fn persist(&mut self, force_remote: bool) -> Result<(), AttemptError> {
        self.write(&self.session, force_remote)
    }

    fn write(&self, session: &Session, force_remote: bool) -> Result<(), AttemptError> {
        let snapshot = session.snapshot();
        self.local.save(&snapshot)?;
        if force_remote || session.auto_save() {
            self.queue.enqueue(snapshot);
        }
        Ok(())
    }
}

fn dispatch(session: &mut Session, command: Command) -> Result<CommandOutcome, AttemptError> {
    let outcome = match command {
        Command::RecordAnswer {
            index,
            value,
            time_spent_secs,
        } => {
            session.record_answer(index, value, time_spent_secs)?;
            CommandOutcome::Answered
        }
        Command::ClearAnswer { index } => CommandOutcome::Cleared(session.clear_answer(index)?),
        Command::ToggleFlag { index } => CommandOutcome::Flagged(session.toggle_flag(index)?),
        Command::NextQuestion => CommandOutcome::Moved(session.advance_question()?),
        Command::PreviousQuestion => CommandOutcome::Moved(session.previous_question()?),
        Command::GoToQuestion { index } => {
            session.set_current_question(index)?;
            CommandOutcome::Moved(index)
        }
        Command::FinalizeModule { module_id } => {
            CommandOutcome::Transition(session.finalize_module(&module_id)?)
        }
        Command::EndBreak => CommandOutcome::BreakEnded(session.end_break()?),
        Command::Submit => CommandOutcome::Submitted(session.submit()?),
        Command::Abandon => {
            session.abandon()?;
            CommandOutcome::Abandoned
        }
        Command::SetAutoSave(enabled) => {
            session.set_auto_save(enabled);
            CommandOutcome::AutoSave(enabled)
        }
        Command::Tick { elapsed_secs } => CommandOutcome::Tick(session.tick(elapsed_secs)?),
    };
    Ok(outcome)
}

/// Phase equality ignoring the break countdown.
fn same_phase(a: Phase, b: Phase) -> bool {
    std::mem::discriminant(&a) == std::mem::discriminant(&b)
}
