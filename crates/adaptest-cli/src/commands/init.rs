//! The `adaptest init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("adaptest.toml").exists() {
        println!("adaptest.toml already exists, skipping.");
    } else {
        std::fs::write("adaptest.toml", SAMPLE_CONFIG)?;
        println!("Created adaptest.toml");
    }

    std::fs::create_dir_all("definitions")?;
    let example_path = std::path::Path::new("definitions/example.toml");
    if example_path.exists() {
        println!("definitions/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_DEFINITION)?;
        println!("Created definitions/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit adaptest.toml with your remote store settings");
    println!("  2. Run: adaptest validate --definition definitions/example.toml");
    println!("  3. Run: adaptest simulate --definition definitions/example.toml --script answers.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# adaptest configuration

data_dir = "./adaptest-data"
definitions_dir = "./definitions"

# Remote snapshot store. Remove this section to keep attempts local only.
[remote]
base_url = "${ADAPTEST_REMOTE_URL}"
api_token = "${ADAPTEST_API_TOKEN}"
timeout_secs = 30

[sync]
base_delay_ms = 500
max_delay_ms = 60000
max_in_flight = 4
"#;

const EXAMPLE_DEFINITION: &str = r#"[test]
id = "example"
name = "Example Adaptive Test"
description = "One routing module followed by an easier or harder second module"
entry_module = "math-1"

[[modules]]
id = "math-1"
name = "Math Module 1"
subject = "math"
order = 1
duration_minutes = 10
break_after_secs = 120

[[modules.questions]]
id = "m1-q1"
prompt = "What is 3 * 4?"
options = [
    { id = "A", text = "7" },
    { id = "B", text = "12" },
    { id = "C", text = "34" },
]
correct_answer = "B"
explanation = "3 * 4 = 12"

[[modules.questions]]
id = "m1-q2"
kind = "numeric"
prompt = "Write 1/4 as a decimal."
correct_answer = "0.25"
explanation = "1 divided by 4 is 0.25"

[[modules.rules]]
operator = "greater_than"
threshold = 1
then = "math-2-hard"
else = "math-2-easy"
description = "Both correct goes to the hard module"

[[modules]]
id = "math-2-hard"
name = "Math Module 2 (hard)"
subject = "math"
difficulty = "hard"
order = 2
duration_minutes = 10

[[modules.questions]]
id = "h-q1"
kind = "numeric"
prompt = "Solve x^2 = 16 for x > 0."
correct_answer = "4"
explanation = "The positive square root of 16 is 4"

[[modules]]
id = "math-2-easy"
name = "Math Module 2 (easy)"
subject = "math"
difficulty = "easy"
order = 2
duration_minutes = 10

[[modules.questions]]
id = "e-q1"
prompt = "What is 2 + 2?"
options = [{ id = "A", text = "4" }, { id = "B", text = "5" }]
correct_answer = "A"
explanation = "2 + 2 = 4"
"#;
