//! Outcome-guarded postcondition checking
//!
//! Only blocks whose condition matches the trial [`Outcome`] are evaluated.
//! Inactive blocks produce no results at all; they are not reported as
//! skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{check_clause, CheckResult, CheckType};
use crate::ast::{Behavior, PostCondition};
use crate::evaluator::EvaluationContext;

/// Result of one execution attempt: `success` or a named error code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Outcome {
    Success,
    Error(String),
}

impl Outcome {
    pub fn as_str(&self) -> &str {
        match self {
            Outcome::Success => "success",
            Outcome::Error(code) => code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl From<String> for Outcome {
    fn from(s: String) -> Self {
        if s == "success" {
            Outcome::Success
        } else {
            Outcome::Error(s)
        }
    }
}

impl From<Outcome> for String {
    fn from(o: Outcome) -> Self {
        o.as_str().to_string()
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PostCondition {
    /// Whether a block guarded by this condition is active for `outcome`
    pub fn is_active(&self, outcome: &Outcome) -> bool {
        self.applies_to(outcome.as_str())
    }
}

/// Evaluate the predicates of every block active for `outcome`
///
/// Predicates are named `postcondition_<condition>_<n>`. When several
/// blocks share a condition, `n` keeps counting across them so names stay
/// unique.
pub fn check_postconditions(
    behavior: &Behavior,
    ctx: &EvaluationContext<'_>,
    outcome: &Outcome,
) -> Vec<CheckResult> {
    let mut counters: BTreeMap<&str, usize> = BTreeMap::new();
    let mut results = Vec::new();

    for block in &behavior.postconditions {
        if !block.condition.is_active(outcome) {
            continue;
        }
        let condition = block.condition.as_str();
        for expr in &block.predicates {
            let n = counters.entry(condition).or_insert(0);
            *n += 1;
            results.push(check_clause(
                CheckType::Postcondition,
                format!("postcondition_{}_{}", condition, n),
                expr,
                ctx,
            ));
        }
    }

    results
}

/// Number of postcondition predicates that would run for `outcome`
pub fn applicable_postcondition_count(behavior: &Behavior, outcome: &Outcome) -> usize {
    behavior
        .postconditions
        .iter()
        .filter(|block| block.condition.is_active(outcome))
        .map(|block| block.predicates.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Domain, Expression};
    use crate::store::EntityStore;
    use crate::value::Value;

    fn behavior() -> Behavior {
        Behavior::new("Increment")
            .with_error("COUNTER_NOT_FOUND")
            .with_postconditions(
                PostCondition::Success,
                vec![Expression::path("result.value").greater_than(Expression::int(0))],
            )
            .with_postconditions(
                PostCondition::Named("COUNTER_NOT_FOUND".into()),
                vec![Expression::path("error.code").equals(Expression::string("COUNTER_NOT_FOUND"))],
            )
            .with_postconditions(
                PostCondition::AnyError,
                vec![
                    Expression::path("error.retriable").equals(Expression::bool(false)),
                    Expression::path("error.message").not_equals(Expression::null()),
                ],
            )
    }

    #[test]
    fn test_outcome_round_trips_as_string() {
        let json = serde_json::to_string(&Outcome::Error("TIMEOUT".into())).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
        let back: Outcome = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(back, Outcome::Success);
    }

    #[test]
    fn test_success_activates_only_success_block() {
        let b = behavior();
        let domain = Domain::new("D");
        let store = EntityStore::new();
        let input = Value::Null;
        let result = Value::object([("value", Value::from(3))]);
        let ctx = EvaluationContext::new(&domain, &store, &input).with_result(&result);

        let results = check_postconditions(&b, &ctx, &Outcome::Success);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "postcondition_success_1");
        assert!(results[0].passed);
        assert_eq!(applicable_postcondition_count(&b, &Outcome::Success), 1);
    }

    #[test]
    fn test_named_error_activates_named_and_any_error_blocks() {
        let b = behavior();
        let domain = Domain::new("D");
        let store = EntityStore::new();
        let input = Value::Null;
        let error = Value::object([
            ("code", Value::from("COUNTER_NOT_FOUND")),
            ("message", Value::from("no such counter")),
            ("retriable", Value::from(false)),
        ]);
        let ctx = EvaluationContext::new(&domain, &store, &input).with_error(&error);
        let outcome = Outcome::Error("COUNTER_NOT_FOUND".into());

        let results = check_postconditions(&b, &ctx, &outcome);
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "postcondition_COUNTER_NOT_FOUND_1",
                "postcondition_any_error_1",
                "postcondition_any_error_2",
            ]
        );
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn test_other_error_skips_named_block() {
        let b = behavior();
        let outcome = Outcome::Error("RATE_LIMITED".into());
        assert_eq!(applicable_postcondition_count(&b, &outcome), 2);
    }

    #[test]
    fn test_repeated_condition_keeps_names_unique() {
        let b = Behavior::new("B")
            .with_postconditions(PostCondition::Success, vec![Expression::bool(true)])
            .with_postconditions(PostCondition::Success, vec![Expression::bool(false)]);
        let domain = Domain::new("D");
        let store = EntityStore::new();
        let input = Value::Null;
        let ctx = EvaluationContext::new(&domain, &store, &input);

        let results = check_postconditions(&b, &ctx, &Outcome::Success);
        assert_eq!(results[0].name, "postcondition_success_1");
        assert_eq!(results[1].name, "postcondition_success_2");
        assert!(!results[1].passed);
    }
}
