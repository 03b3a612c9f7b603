//! The `adaptest inspect` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use adaptest_core::session::{Phase, Session};
use adaptest_sync::config::load_config_from;
use adaptest_sync::engine::Catalog;
use adaptest_sync::store::{FileStore, LocalStore};

/// Resume a stored attempt in memory and print where it stands.
/// Nothing is written back.
pub fn execute(attempt_id: Uuid, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = FileStore::open(config.attempts_dir())?;
    let snapshot = store
        .load(attempt_id)?
        .with_context(|| format!("attempt {attempt_id} not found in {}", store.dir().display()))?;

    let (catalog, _rejected) = Catalog::from_directory(&config.definitions_dir)?;
    let graph = catalog.get(&snapshot.test_id).with_context(|| {
        format!(
            "test {} not found in {}",
            snapshot.test_id,
            config.definitions_dir.display()
        )
    })?;

    let revision = snapshot.revision;
    let last_modified = snapshot.last_modified;
    let resumed = Session::resume(graph, snapshot)?;
    let session = &resumed.session;
    let view = session.view();

    println!("Attempt: {attempt_id}");
    println!("Test: {} ({})", session.graph().name(), view.test_id);
    println!("Phase: {}", view.phase);
    println!(
        "Revision: {revision} (last modified {})",
        last_modified.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !session.path().is_empty() {
        println!("Completed: {}", session.path().join(" -> "));
    }

    if let (Some(id), Some(name)) = (&view.module_id, &view.module_name) {
        match view.phase {
            Phase::InBreak { remaining_secs } => {
                println!("On break, {remaining_secs}s left before {name} ({id})");
            }
            _ => println!(
                "Module: {name} ({id}), question {}/{}, {}s remaining",
                view.question_index + 1,
                view.question_count,
                view.time_remaining_secs
            ),
        }
        print_questions(&view);
    }

    if let Some(preview) = session.preview_score() {
        println!(
            "Preview: {}/{} points ({} answered)",
            preview.total_points,
            preview.max_points,
            view.questions.iter().filter(|q| q.answered).count()
        );
    }

    if let Some(result) = session.result() {
        println!(
            "Score: {}/{} ({:.1}%), {} flagged",
            result.score, result.max_score, result.percentage, result.questions_flagged
        );
    }

    if !resumed.is_clean() {
        println!("\nResuming would repair:");
        for repair in &resumed.repairs {
            println!("  - {repair}");
        }
    }

    Ok(())
}

fn print_questions(view: &adaptest_core::session::SessionView) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["#", "Question", "Answered", "Flagged"]);
    for q in &view.questions {
        let marker = if q.index == view.question_index { ">" } else { "" };
        table.add_row(vec![
            Cell::new(format!("{marker}{}", q.index + 1)),
            Cell::new(&q.question_id),
            Cell::new(if q.answered { "yes" } else { "" }),
            Cell::new(if q.flagged { "yes" } else { "" }),
        ]);
    }
    println!("{table}");
}
