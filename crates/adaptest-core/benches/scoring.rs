use std::collections::BTreeMap;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adaptest_core::model::{
    AdaptiveRule, Answer, AnswerOption, AnswerValue, Difficulty, Module, Question, QuestionKind,
    RuleCondition, Subject,
};
use adaptest_core::router::next_module;
use adaptest_core::scorer::{parse_numeric, score};

fn make_module(questions: usize) -> Module {
    let questions = (0..questions)
        .map(|i| {
            if i % 4 == 3 {
                Question {
                    id: format!("q{i}"),
                    kind: QuestionKind::Numeric,
                    prompt: String::new(),
                    options: vec![],
                    correct_answer: "1/4".into(),
                    explanation: String::new(),
                    points: None,
                    image: None,
                }
            } else {
                Question {
                    id: format!("q{i}"),
                    kind: QuestionKind::MultipleChoice,
                    prompt: String::new(),
                    options: ["A", "B", "C", "D"]
                        .iter()
                        .map(|o| AnswerOption {
                            id: o.to_string(),
                            text: String::new(),
                        })
                        .collect(),
                    correct_answer: "B".into(),
                    explanation: String::new(),
                    points: Some(2),
                    image: None,
                }
            }
        })
        .collect();

    Module {
        id: "bench".into(),
        name: "Bench".into(),
        subject: Subject::Math,
        difficulty: Difficulty::Medium,
        order: 1,
        duration_secs: 2100,
        break_after_secs: 0,
        passage: None,
        question_types: vec![],
        questions,
        rules: vec![
            AdaptiveRule {
                condition: RuleCondition::GreaterThan { threshold: 40.0 },
                then_module: "hard".into(),
                else_module: None,
                description: String::new(),
            },
            AdaptiveRule {
                condition: RuleCondition::GreaterThan { threshold: 20.0 },
                then_module: "medium".into(),
                else_module: Some("easy".into()),
                description: String::new(),
            },
        ],
    }
}

fn make_answers(module: &Module) -> BTreeMap<String, Answer> {
    module
        .questions
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 5 != 0)
        .map(|(i, q)| {
            let value = match q.kind {
                QuestionKind::Numeric => AnswerValue::Text("0.25".into()),
                _ => AnswerValue::Choice(if i % 2 == 0 { "B" } else { "C" }.into()),
            };
            let answer = Answer {
                question_id: q.id.clone(),
                question_index: i,
                value,
                time_spent_secs: 30,
                correct: None,
                points_earned: None,
                flagged: false,
                last_modified: Utc::now(),
            };
            (q.id.clone(), answer)
        })
        .collect()
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");

    for size in [22, 27, 100] {
        let module = make_module(size);
        let answers = make_answers(&module);
        group.bench_function(format!("questions={size}"), |b| {
            b.iter(|| score(black_box(&module), black_box(&answers)))
        });
    }

    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("route");
    let module = make_module(27);
    let module_score = score(&module, &make_answers(&module));

    group.bench_function("two_rule_chain", |b| {
        b.iter(|| next_module(black_box(&module), black_box(&module_score)))
    });

    group.finish();
}

fn bench_parse_numeric(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_numeric");

    for input in ["42", " +1,250.50 ", "3/8", "not a number"] {
        group.bench_function(input.trim(), |b| b.iter(|| parse_numeric(black_box(input))));
    }

    group.finish();
}

criterion_group!(benches, bench_score, bench_route, bench_parse_numeric);
criterion_main!(benches);
