//! The `adaptest simulate` command.
//!
//! Drives a scripted attempt through the session state machine: every module
//! the router selects is answered from the script, then finalized (or left to
//! run out of time), until the attempt is submitted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adaptest_core::graph::ModuleGraph;
use adaptest_core::model::{AnswerValue, Question, QuestionKind};
use adaptest_core::parser;
use adaptest_core::result::TestResult;
use adaptest_core::scorer::parse_numeric;
use adaptest_core::session::{Phase, Session, TickOutcome};

/// Answers script loaded from TOML.
#[derive(Debug, Deserialize)]
struct AnswerScript {
    /// Seconds spent on each answered question.
    #[serde(default = "default_answer_secs")]
    time_per_answer_secs: u64,
    /// Question ids to flag for review.
    #[serde(default)]
    flag: BTreeSet<String>,
    /// Module ids left to run out of time instead of being finalized.
    #[serde(default)]
    time_out: BTreeSet<String>,
    /// Raw answers keyed by question id.
    #[serde(default)]
    answers: BTreeMap<String, String>,
}

fn default_answer_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct SimulationReport<'a> {
    attempt_id: Uuid,
    test_id: &'a str,
    path: Vec<&'a str>,
    timed_out: Vec<String>,
    result: &'a TestResult,
}

pub fn execute(definition_path: PathBuf, script_path: PathBuf, format: String) -> Result<()> {
    let definition = parser::parse_test_definition(&definition_path)?;
    let graph = Arc::new(
        ModuleGraph::build(definition)
            .with_context(|| format!("invalid test definition: {}", definition_path.display()))?,
    );
    let script = load_script(&script_path)?;

    if let Some(unknown) = script
        .answers
        .keys()
        .chain(&script.flag)
        .find(|id| graph.module_of_question(id).is_none())
    {
        anyhow::bail!("script references unknown question: {unknown}");
    }

    let mut session = Session::new(Arc::clone(&graph), Uuid::new_v4());
    session.start()?;
    let timed_out = run_script(&graph, &mut session, &script)?;

    let result = session
        .result()
        .context("simulation ended without a result")?;
    let report = SimulationReport {
        attempt_id: session.attempt_id(),
        test_id: graph.test_id(),
        path: session.path(),
        timed_out,
        result,
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&graph, &report),
    }

    Ok(())
}

fn load_script(path: &Path) -> Result<AnswerScript> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read answers script: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse answers script: {}", path.display()))
}

/// Returns the ids of modules that timed out.
fn run_script(graph: &ModuleGraph, session: &mut Session, script: &AnswerScript) -> Result<Vec<String>> {
    let mut timed_out = Vec::new();
    // Each module is entered once and may be followed by one break.
    let max_steps = graph.len() * 2 + 1;

    for _ in 0..max_steps {
        match session.phase() {
            Phase::Submitted => return Ok(timed_out),
            Phase::InBreak { remaining_secs } => {
                session.tick(remaining_secs)?;
            }
            Phase::InModule => {
                let module = session
                    .current_module()
                    .and_then(|m| graph.module(&m.id))
                    .context("session is in a module the graph does not know")?;

                let mut answered = 0;
                for (index, question) in module.questions.iter().enumerate() {
                    if let Some(raw) = script.answers.get(&question.id) {
                        session.record_answer(
                            index,
                            answer_value(question, raw),
                            script.time_per_answer_secs,
                        )?;
                        answered += 1;
                    }
                    if script.flag.contains(&question.id) {
                        session.toggle_flag(index)?;
                    }
                }

                let elapsed = if script.time_out.contains(&module.id) {
                    module.duration_secs
                } else {
                    (answered * script.time_per_answer_secs).min(module.duration_secs.saturating_sub(1))
                };
                match session.tick(elapsed)? {
                    TickOutcome::TimedOut(_) => timed_out.push(module.id.clone()),
                    _ => {
                        session.finalize_module(&module.id)?;
                    }
                }
            }
            phase @ (Phase::NotStarted | Phase::Abandoned) => {
                anyhow::bail!("simulation cannot continue, attempt is {phase}")
            }
        }
    }

    anyhow::ensure!(
        session.phase() == Phase::Submitted,
        "simulation did not finish after {max_steps} steps"
    );
    Ok(timed_out)
}

/// Option-based questions take the raw text as an option id; numeric ones
/// are parsed when possible.
fn answer_value(question: &Question, raw: &str) -> AnswerValue {
    if question.is_option_based() {
        return AnswerValue::Choice(raw.to_string());
    }
    match question.kind {
        QuestionKind::Numeric => parse_numeric(raw)
            .map(AnswerValue::Numeric)
            .unwrap_or_else(|| AnswerValue::Text(raw.to_string())),
        _ => AnswerValue::Text(raw.to_string()),
    }
}

fn print_text(graph: &ModuleGraph, report: &SimulationReport<'_>) {
    use comfy_table::{Cell, Table};

    let result = report.result;
    println!("Test: {} ({})", graph.name(), report.test_id);
    println!("Path: {}", report.path.join(" -> "));
    if !report.timed_out.is_empty() {
        println!("Timed out: {}", report.timed_out.join(", "));
    }

    let mut table = Table::new();
    table.set_header(vec!["Module", "Correct", "Incorrect", "Skipped", "Points"]);
    for score in &result.modules {
        let name = graph
            .module(&score.module_id)
            .map(|m| m.name.as_str())
            .unwrap_or(score.module_id.as_str());
        table.add_row(vec![
            Cell::new(name),
            Cell::new(score.correct_count()),
            Cell::new(score.incorrect_count()),
            Cell::new(score.skipped_count()),
            Cell::new(format!("{}/{}", score.total_points, score.max_points)),
        ]);
    }
    println!("{table}");

    println!(
        "Score: {}/{} ({:.1}%)",
        result.score, result.max_score, result.percentage
    );
    println!(
        "Correct: {}, incorrect: {}, skipped: {}, flagged: {}",
        result.questions_correct,
        result.questions_incorrect,
        result.questions_skipped,
        result.questions_flagged
    );
    println!("Time spent: {}s", result.time_spent_secs);
}
