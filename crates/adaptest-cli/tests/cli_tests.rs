//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

use adaptest_core::graph::ModuleGraph;
use adaptest_core::model::AnswerValue;
use adaptest_core::parser::parse_test_definition;
use adaptest_core::session::Session;
use adaptest_sync::store::{FileStore, LocalStore};

fn adaptest() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("adaptest").unwrap()
}

fn definitions_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../definitions")
}

fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("adaptest.toml");
    let config = format!(
        "data_dir = \"{}\"\ndefinitions_dir = \"{}\"\n{extra}",
        dir.join("data").display(),
        definitions_dir().display()
    );
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn validate_definition_file() {
    adaptest()
        .arg("validate")
        .arg("--definition")
        .arg("../../definitions/sat-practice.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("SAT Practice Test (6 modules, 13 questions)"))
        .stdout(predicate::str::contains("entry: rw-1"))
        .stdout(predicate::str::contains("All test definitions valid"));
}

#[test]
fn validate_directory() {
    adaptest()
        .arg("validate")
        .arg("--definition")
        .arg("../../definitions")
        .assert()
        .success()
        .stdout(predicate::str::contains("SAT Practice Test"));
}

#[test]
fn validate_nonexistent_file() {
    adaptest()
        .arg("validate")
        .arg("--definition")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn validate_rejects_unknown_rule_target() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"
[test]
id = "broken"
name = "Broken"

[[modules]]
id = "m1"
name = "M1"
subject = "math"
order = 1
duration_secs = 60

[[modules.questions]]
id = "q1"
kind = "numeric"
prompt = "1 + 1"
correct_answer = "2"
explanation = "two"

[[modules.rules]]
operator = "gt"
threshold = 0
then = "missing"
"#,
    )
    .unwrap();

    adaptest()
        .arg("validate")
        .arg("--definition")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("targets unknown module missing"))
        .stderr(predicate::str::contains("1 invalid test definition(s)"));
}

#[test]
fn simulate_strong_student_takes_hard_path() {
    adaptest()
        .arg("simulate")
        .arg("--definition")
        .arg("../../definitions/sat-practice.toml")
        .arg("--script")
        .arg("../../answer-scripts/strong.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Path: rw-1 -> rw-2-hard -> math-1 -> math-2-hard",
        ))
        .stdout(predicate::str::contains("Score: 12/12 (100.0%)"))
        .stdout(predicate::str::contains("flagged: 1"));
}

#[test]
fn simulate_json_output() {
    let output = adaptest()
        .arg("simulate")
        .arg("--definition")
        .arg("../../definitions/sat-practice.toml")
        .arg("--script")
        .arg("../../answer-scripts/weak.toml")
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["test_id"], "sat-practice");
    assert_eq!(
        report["path"],
        serde_json::json!(["rw-1", "rw-2-easy", "math-1", "math-2-easy"])
    );
    assert_eq!(report["timed_out"], serde_json::json!(["math-1"]));
    assert_eq!(report["result"]["score"], 4);
    assert_eq!(report["result"]["max_score"], 12);
    assert_eq!(report["result"]["questions_correct"], 4);
    assert_eq!(report["result"]["questions_incorrect"], 2);
    assert_eq!(report["result"]["questions_skipped"], 4);
}

#[test]
fn simulate_rejects_unknown_question() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("answers.toml");
    std::fs::write(&script, "[answers]\nnope = \"A\"\n").unwrap();

    adaptest()
        .arg("simulate")
        .arg("--definition")
        .arg("../../definitions/sat-practice.toml")
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown question: nope"));
}

#[test]
fn inspect_stored_attempt() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let definition = parse_test_definition(&definitions_dir().join("sat-practice.toml")).unwrap();
    let graph = Arc::new(ModuleGraph::build(definition).unwrap());
    let attempt_id = Uuid::new_v4();
    let mut session = Session::new(graph, attempt_id);
    session.start().unwrap();
    session
        .record_answer(0, AnswerValue::Choice("B".into()), 20)
        .unwrap();
    session.toggle_flag(2).unwrap();
    session.set_current_question(2).unwrap();

    let store = FileStore::open(dir.path().join("data/attempts")).unwrap();
    store.save(&session.snapshot()).unwrap();

    adaptest()
        .arg("inspect")
        .arg("--attempt")
        .arg(attempt_id.to_string())
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Phase: in a module"))
        .stdout(predicate::str::contains(
            "Module: Reading and Writing Module 1 (rw-1), question 3/4",
        ))
        .stdout(predicate::str::contains("Preview: 1/4 points (1 answered)"))
        .stdout(predicate::str::contains("Resuming would repair").not());
}

#[test]
fn inspect_missing_attempt() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    adaptest()
        .arg("inspect")
        .arg("--attempt")
        .arg(Uuid::new_v4().to_string())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn sync_requires_remote() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    adaptest()
        .env_remove("ADAPTEST_REMOTE_URL")
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no remote configured"));
}

#[test]
fn sync_with_no_local_attempts() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        "\n[remote]\nbase_url = \"http://127.0.0.1:9\"\n",
    );

    adaptest()
        .env_remove("ADAPTEST_REMOTE_URL")
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No local attempts"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    adaptest()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created adaptest.toml"))
        .stdout(predicate::str::contains("Created definitions/example.toml"));

    assert!(dir.path().join("adaptest.toml").exists());
    assert!(dir.path().join("definitions/example.toml").exists());

    // The generated definition is valid.
    adaptest()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--definition")
        .arg("definitions/example.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All test definitions valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    adaptest()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    adaptest()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}
