//! The immutable module graph of a published test.
//!
//! All structural checks happen in [`ModuleGraph::build`]; a graph that
//! exists is safe to run sessions against.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::ValidationError;
use crate::model::{Module, QuestionKind, TestDefinition};
use crate::parser::ValidationWarning;

/// Validated lookup of modules by id, with a single entry module.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    test_id: String,
    name: String,
    entry: String,
    modules: HashMap<String, Module>,
}

impl ModuleGraph {
    /// Validate `definition` and build the graph.
    pub fn build(definition: TestDefinition) -> Result<Self, ValidationError> {
        if definition.modules.is_empty() {
            return Err(ValidationError::EmptyTest);
        }

        let mut modules: HashMap<String, Module> = HashMap::new();
        let mut question_ids = HashSet::new();

        for module in &definition.modules {
            if module.questions.is_empty() {
                return Err(ValidationError::EmptyModule(module.id.clone()));
            }
            if module.duration_secs == 0 {
                return Err(ValidationError::ZeroDuration(module.id.clone()));
            }
            for question in &module.questions {
                if !question_ids.insert(question.id.as_str()) {
                    return Err(ValidationError::DuplicateQuestion(question.id.clone()));
                }
                check_question(question)?;
            }
            for rule in &module.rules {
                if !rule.condition.threshold().is_finite() {
                    return Err(ValidationError::InvalidThreshold(module.id.clone()));
                }
            }
        }

        for module in &definition.modules {
            if modules.insert(module.id.clone(), module.clone()).is_some() {
                return Err(ValidationError::DuplicateModule(module.id.clone()));
            }
        }

        // Every edge must exist and point strictly forward in order.
        let mut referenced = HashSet::new();
        for module in &definition.modules {
            for rule in &module.rules {
                let targets = std::iter::once(&rule.then_module).chain(rule.else_module.as_ref());
                for target in targets {
                    let Some(target_module) = modules.get(target) else {
                        return Err(ValidationError::UnknownTarget {
                            module: module.id.clone(),
                            target: target.clone(),
                        });
                    };
                    if target_module.order <= module.order {
                        return Err(ValidationError::NonIncreasingOrder {
                            module: module.id.clone(),
                            module_order: module.order,
                            target: target.clone(),
                            target_order: target_module.order,
                        });
                    }
                    referenced.insert(target.as_str());
                }
            }
        }

        let roots: Vec<String> = definition
            .modules
            .iter()
            .map(|m| m.id.as_str())
            .filter(|id| !referenced.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(String::from)
            .collect();

        let entry = match roots.as_slice() {
            [] => return Err(ValidationError::NoEntry),
            [only] => only.clone(),
            _ => return Err(ValidationError::MultipleEntries(roots.clone())),
        };

        if let Some(declared) = &definition.entry_module {
            if *declared != entry {
                return Err(ValidationError::EntryMismatch {
                    declared: declared.clone(),
                    computed: entry,
                });
            }
        }

        tracing::debug!(
            test = %definition.id,
            modules = modules.len(),
            entry = %entry,
            "module graph built"
        );

        Ok(Self {
            test_id: definition.id,
            name: definition.name,
            entry,
            modules,
        })
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module every session starts in.
    pub fn entry(&self) -> &Module {
        // `build` guarantees the entry id is present.
        &self.modules[&self.entry]
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// All modules sorted by their order index.
    pub fn modules_in_order(&self) -> Vec<&Module> {
        let mut modules: Vec<&Module> = self.modules.values().collect();
        modules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        modules
    }

    /// Module that owns the question with `question_id`.
    pub fn module_of_question(&self, question_id: &str) -> Option<&Module> {
        self.modules
            .values()
            .find(|m| m.question_index(question_id).is_some())
    }

    /// Sum of the maximum points of every module, taken or not.
    pub fn max_points(&self) -> u32 {
        self.modules.values().map(Module::max_points).sum()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn check_question(question: &crate::model::Question) -> Result<(), ValidationError> {
    let invalid = |message: &str| ValidationError::InvalidQuestion {
        question: question.id.clone(),
        message: message.to_string(),
    };

    match question.kind {
        QuestionKind::MultipleChoice => {
            if question.options.is_empty() {
                return Err(invalid("multiple choice question has no options"));
            }
        }
        QuestionKind::Numeric => {
            if crate::scorer::parse_numeric(&question.correct_answer).is_none() {
                return Err(invalid("correct answer is not a number"));
            }
        }
        QuestionKind::Image | QuestionKind::Passage => {}
    }

    if question.is_option_based()
        && !question
            .options
            .iter()
            .any(|o| o.id == question.correct_answer)
    {
        return Err(invalid("correct answer is not one of the option ids"));
    }

    if question.correct_answer.trim().is_empty() {
        return Err(invalid("correct answer is empty"));
    }

    Ok(())
}

/// Report non-fatal authoring issues in a definition.
pub fn lint(definition: &TestDefinition) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for module in &definition.modules {
        for declared in &module.question_types {
            let actual = module
                .questions
                .iter()
                .filter(|q| q.kind == declared.kind)
                .count();
            if actual != declared.count as usize {
                warnings.push(ValidationWarning {
                    module_id: Some(module.id.clone()),
                    message: format!(
                        "declares {} {} questions but has {}",
                        declared.count, declared.kind, actual
                    ),
                });
            }
        }

        for question in &module.questions {
            if question.explanation.trim().is_empty() {
                warnings.push(ValidationWarning {
                    module_id: Some(module.id.clone()),
                    message: format!("question {} has no explanation", question.id),
                });
            }
            if question.is_option_based() && question.kind == QuestionKind::Numeric {
                warnings.push(ValidationWarning {
                    module_id: Some(module.id.clone()),
                    message: format!(
                        "numeric question {} has options and will be scored by option id",
                        question.id
                    ),
                });
            }
        }

        for rule in &module.rules {
            if rule.else_module.as_ref() == Some(&rule.then_module) {
                warnings.push(ValidationWarning {
                    module_id: Some(module.id.clone()),
                    message: format!(
                        "rule '{}' routes to {} on both branches",
                        rule.condition, rule.then_module
                    ),
                });
            }
        }
    }

    warnings
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{AdaptiveRule, AnswerOption, Difficulty, Question, RuleCondition, Subject};

    pub(crate) fn mcq(id: &str, correct: &str, points: u32) -> Question {
        Question {
            id: id.into(),
            kind: QuestionKind::MultipleChoice,
            prompt: format!("Question {id}"),
            options: ["A", "B", "C", "D"]
                .iter()
                .map(|o| AnswerOption {
                    id: o.to_string(),
                    text: o.to_lowercase(),
                })
                .collect(),
            correct_answer: correct.into(),
            explanation: "because".into(),
            points: Some(points),
            image: None,
        }
    }

    pub(crate) fn module(id: &str, order: u32, questions: Vec<Question>) -> Module {
        Module {
            id: id.into(),
            name: id.to_uppercase(),
            subject: Subject::Math,
            difficulty: Difficulty::Medium,
            order,
            duration_secs: 300,
            break_after_secs: 0,
            passage: None,
            question_types: vec![],
            questions,
            rules: vec![],
        }
    }

    pub(crate) fn gt(threshold: f64, then: &str, otherwise: Option<&str>) -> AdaptiveRule {
        AdaptiveRule {
            condition: RuleCondition::GreaterThan { threshold },
            then_module: then.into(),
            else_module: otherwise.map(String::from),
            description: String::new(),
        }
    }

    pub(crate) fn definition(modules: Vec<Module>) -> TestDefinition {
        TestDefinition {
            id: "sat-1".into(),
            name: "Practice SAT".into(),
            description: String::new(),
            entry_module: None,
            modules,
        }
    }

    /// m1 -> (score > 1) m2-hard, else m2-easy.
    pub(crate) fn two_stage() -> TestDefinition {
        let mut m1 = module("m1", 1, vec![mcq("q1", "A", 1), mcq("q2", "B", 1)]);
        m1.rules = vec![gt(1.0, "m2-hard", Some("m2-easy"))];
        definition(vec![
            m1,
            module("m2-hard", 2, vec![mcq("h1", "C", 2)]),
            module("m2-easy", 2, vec![mcq("e1", "D", 1)]),
        ])
    }

    #[test]
    fn builds_valid_graph() {
        let graph = ModuleGraph::build(two_stage()).unwrap();
        assert_eq!(graph.entry().id, "m1");
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.modules_in_order()[0].id, "m1");
        assert_eq!(graph.module_of_question("h1").unwrap().id, "m2-hard");
        assert_eq!(graph.max_points(), 5);
    }

    #[test]
    fn rejects_unknown_target() {
        let mut def = two_stage();
        def.modules[0].rules = vec![gt(1.0, "missing", None)];
        def.modules.truncate(1);
        let err = ModuleGraph::build(def).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownTarget {
                module: "m1".into(),
                target: "missing".into()
            }
        );
    }

    #[test]
    fn rejects_backward_and_self_edges() {
        let mut def = two_stage();
        def.modules[1].rules = vec![gt(0.0, "m1", None)];
        assert!(matches!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::NonIncreasingOrder { .. }
        ));

        let mut def = two_stage();
        def.modules[1].rules = vec![gt(0.0, "m2-hard", None)];
        assert!(matches!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::NonIncreasingOrder { .. }
        ));
    }

    #[test]
    fn requires_exactly_one_entry() {
        let def = definition(vec![
            module("a", 1, vec![mcq("q1", "A", 1)]),
            module("b", 2, vec![mcq("q2", "A", 1)]),
        ]);
        assert_eq!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::MultipleEntries(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn declared_entry_must_match() {
        let mut def = two_stage();
        def.entry_module = Some("m2-easy".into());
        assert!(matches!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::EntryMismatch { .. }
        ));
    }

    #[test]
    fn rejects_bad_questions() {
        let mut def = two_stage();
        def.modules[0].questions[0].correct_answer = "Z".into();
        assert!(matches!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::InvalidQuestion { .. }
        ));

        let mut def = two_stage();
        def.modules[2].questions[0].id = "q1".into();
        assert_eq!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::DuplicateQuestion("q1".into())
        );

        let mut def = two_stage();
        def.modules[1].questions.clear();
        assert_eq!(
            ModuleGraph::build(def).unwrap_err(),
            ValidationError::EmptyModule("m2-hard".into())
        );
    }

    #[test]
    fn lint_reports_count_mismatch_and_same_branches() {
        let mut def = two_stage();
        def.modules[0].question_types = vec![crate::model::QuestionTypeConfig {
            kind: QuestionKind::MultipleChoice,
            count: 5,
            points: 1,
        }];
        def.modules[0].rules = vec![gt(1.0, "m2-hard", Some("m2-hard"))];
        let warnings = lint(&def);
        assert!(warnings.iter().any(|w| w.message.contains("declares 5")));
        assert!(warnings.iter().any(|w| w.message.contains("both branches")));
    }
}
