//! Adaptive routing between modules.
//!
//! Rules behave like an if / else-if chain: the first rule that resolves to a
//! target (its `then` branch when the condition holds, its `else` branch when
//! it does not) wins. A rule without an `else` target falls through.

use crate::model::Module;
use crate::scorer::ModuleScore;

/// How a routing decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Then,
    Else,
}

/// A resolved routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub target: &'a str,
    /// Index of the deciding rule within the module's rules.
    pub rule_index: usize,
    pub branch: Branch,
}

/// Pick the module that follows `module`, or `None` when the exam ends.
pub fn next_module<'a>(module: &'a Module, score: &ModuleScore) -> Option<&'a str> {
    resolve(module, score).map(|route| route.target)
}

/// Like [`next_module`] but also reports which rule decided.
pub fn resolve<'a>(module: &'a Module, score: &ModuleScore) -> Option<Route<'a>> {
    for (rule_index, rule) in module.rules.iter().enumerate() {
        if rule.condition.is_satisfied(score.total_points) {
            return Some(Route {
                target: &rule.then_module,
                rule_index,
                branch: Branch::Then,
            });
        }
        if let Some(else_module) = &rule.else_module {
            return Some(Route {
                target: else_module,
                rule_index,
                branch: Branch::Else,
            });
        }
    }
    None
}
