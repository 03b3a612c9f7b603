//! The `adaptest validate` command.

use std::path::PathBuf;

use anyhow::Result;

use adaptest_core::graph::{lint, ModuleGraph};
use adaptest_core::parser;

pub fn execute(definition_path: PathBuf) -> Result<()> {
    let definitions = if definition_path.is_dir() {
        parser::load_definition_directory(&definition_path)?
    } else {
        vec![parser::parse_test_definition(&definition_path)?]
    };

    let mut total_warnings = 0;
    let mut invalid = 0;

    for definition in definitions {
        let question_count: usize = definition.modules.iter().map(|m| m.questions.len()).sum();
        println!(
            "Test: {} ({} modules, {} questions)",
            definition.name,
            definition.modules.len(),
            question_count
        );

        let warnings = lint(&definition);
        for w in &warnings {
            let prefix = w
                .module_id
                .as_ref()
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();

        match ModuleGraph::build(definition) {
            Ok(graph) => println!(
                "  entry: {}, {} points across all modules",
                graph.entry().id,
                graph.max_points()
            ),
            Err(e) => {
                println!("  ERROR: {e}");
                invalid += 1;
            }
        }
    }

    if total_warnings > 0 {
        println!("\n{total_warnings} warning(s) found.");
    }
    anyhow::ensure!(invalid == 0, "{invalid} invalid test definition(s)");
    println!("All test definitions valid.");

    Ok(())
}
