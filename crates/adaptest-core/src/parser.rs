//! TOML test definition parser.
//!
//! Loads test definitions from TOML files and directories. Parsing only
//! checks shape; structural validation happens in
//! [`ModuleGraph::build`](crate::graph::ModuleGraph::build).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{
    AdaptiveRule, AnswerOption, Module, Question, QuestionTypeConfig, RuleCondition,
    TestDefinition,
};

/// Intermediate TOML structure for parsing test definition files.
#[derive(Debug, Deserialize)]
struct TomlDefinitionFile {
    test: TomlTestHeader,
    #[serde(default)]
    modules: Vec<TomlModule>,
}

#[derive(Debug, Deserialize)]
struct TomlTestHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    entry_module: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlModule {
    id: String,
    name: String,
    subject: String,
    #[serde(default = "default_difficulty")]
    difficulty: String,
    order: u32,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    duration_minutes: Option<u64>,
    #[serde(default)]
    break_after_secs: u64,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    question_types: Vec<TomlQuestionType>,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
    #[serde(default)]
    rules: Vec<TomlRule>,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlQuestionType {
    kind: String,
    count: u32,
    #[serde(default = "default_points")]
    points: u32,
}

fn default_points() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    #[serde(default = "default_kind")]
    kind: String,
    prompt: String,
    #[serde(default)]
    options: Vec<TomlOption>,
    correct_answer: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    points: Option<u32>,
    #[serde(default)]
    image: Option<String>,
}

fn default_kind() -> String {
    "multiple_choice".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlOption {
    id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TomlRule {
    operator: String,
    threshold: f64,
    then: String,
    #[serde(default, rename = "else")]
    otherwise: Option<String>,
    #[serde(default)]
    description: String,
}

/// Parse a single TOML file into a `TestDefinition`.
pub fn parse_test_definition(path: &Path) -> Result<TestDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test definition: {}", path.display()))?;

    parse_test_definition_str(&content, path)
}

/// Parse a TOML string into a `TestDefinition` (useful for testing).
pub fn parse_test_definition_str(content: &str, source_path: &Path) -> Result<TestDefinition> {
    let parsed: TomlDefinitionFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let modules = parsed
        .modules
        .into_iter()
        .map(convert_module)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("invalid test definition: {}", source_path.display()))?;

    Ok(TestDefinition {
        id: parsed.test.id,
        name: parsed.test.name,
        description: parsed.test.description,
        entry_module: parsed.test.entry_module,
        modules,
    })
}

fn convert_module(m: TomlModule) -> Result<Module> {
    let subject = m
        .subject
        .parse()
        .map_err(|e: String| anyhow::anyhow!("module {}: {}", m.id, e))?;
    let difficulty = m
        .difficulty
        .parse()
        .map_err(|e: String| anyhow::anyhow!("module {}: {}", m.id, e))?;

    let duration_secs = match (m.duration_secs, m.duration_minutes) {
        (Some(secs), None) => secs,
        (None, Some(minutes)) => minutes * 60,
        (Some(_), Some(_)) => {
            anyhow::bail!("module {}: set duration_secs or duration_minutes, not both", m.id)
        }
        (None, None) => anyhow::bail!("module {}: missing duration_secs", m.id),
    };

    let question_types = m
        .question_types
        .into_iter()
        .map(|t| {
            Ok(QuestionTypeConfig {
                kind: t.kind.parse().map_err(|e: String| anyhow::anyhow!("{}", e))?,
                count: t.count,
                points: t.points,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let questions = m
        .questions
        .into_iter()
        .map(|q| {
            let kind = q
                .kind
                .parse()
                .map_err(|e: String| anyhow::anyhow!("question {}: {}", q.id, e))?;
            Ok(Question {
                id: q.id,
                kind,
                prompt: q.prompt,
                options: q
                    .options
                    .into_iter()
                    .map(|o| AnswerOption {
                        id: o.id,
                        text: o.text,
                    })
                    .collect(),
                correct_answer: q.correct_answer,
                explanation: q.explanation,
                points: q.points,
                image: q.image,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let rules = m
        .rules
        .into_iter()
        .map(|r| {
            Ok(AdaptiveRule {
                condition: parse_condition(&r.operator, r.threshold)
                    .with_context(|| format!("module {}", m.id))?,
                then_module: r.then,
                else_module: r.otherwise,
                description: r.description,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Module {
        id: m.id,
        name: m.name,
        subject,
        difficulty,
        order: m.order,
        duration_secs,
        break_after_secs: m.break_after_secs,
        passage: m.passage,
        question_types,
        questions,
        rules,
    })
}

fn parse_condition(operator: &str, threshold: f64) -> Result<RuleCondition> {
    match operator.to_lowercase().replace('-', "_").as_str() {
        "greater_than" | "gt" | ">" => Ok(RuleCondition::GreaterThan { threshold }),
        "less_than" | "lt" | "<" => Ok(RuleCondition::LessThan { threshold }),
        other => anyhow::bail!("unknown rule operator: {other}"),
    }
}

/// Recursively load all `.toml` test definitions from a directory.
pub fn load_definition_directory(dir: &Path) -> Result<Vec<TestDefinition>> {
    let mut definitions = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            definitions.extend(load_definition_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_test_definition(&path) {
                Ok(definition) => definitions.push(definition),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    definitions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(definitions)
}

/// A non-fatal issue found in a test definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    /// The module the warning refers to (if applicable).
    pub module_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.module_id {
            Some(id) => write!(f, "[{id}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
