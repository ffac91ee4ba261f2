//! Contract checkers - preconditions, postconditions and invariants
//!
//! Every checker walks part of the behavior/domain AST and returns one
//! [`CheckResult`] per evaluated clause. They share a single clause
//! boundary, [`check_clause`], which:
//!
//! - evaluates the clause with the pure evaluator
//! - applies material implication for a top-level `implies`
//!   (false antecedent passes without touching the consequent)
//! - records operands of a top-level comparison as `actual` / `expected`
//! - converts every [`EvalError`](crate::EvalError) into a failed result
//!
//! No checker short-circuits and none of them returns an error: callers
//! always get the complete attribution set in declaration order.

pub mod invariant;
pub mod postcondition;
pub mod precondition;

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Expression};
use crate::error::{EvalError, EvalResult};
use crate::evaluator::{apply_binary, evaluate, evaluate_bool, EvaluationContext};
use crate::printer::print_expression;
use crate::value::Value;

pub use invariant::{
    all_invariants_passed, check_all_invariants, check_behavior_invariants,
    check_domain_invariants, check_entity_invariants, instantiated_invariant_count,
};
pub use postcondition::{applicable_postcondition_count, check_postconditions, Outcome};
pub use precondition::check_preconditions;

// ── Check Results ─────────────────────────────────────────

/// Clause category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Precondition,
    Postcondition,
    Invariant,
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CheckType::Precondition => write!(f, "precondition"),
            CheckType::Postcondition => write!(f, "postcondition"),
            CheckType::Invariant => write!(f, "invariant"),
        }
    }
}

/// Outcome of evaluating one clause
///
/// `name` is unique within a verification result; downstream tools
/// (healer targeting, mutation-kill detection) attribute failures by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub name: String,
    pub expression: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock evaluation time in milliseconds
    #[serde(default)]
    pub duration_ms: f64,
}

impl CheckResult {
    /// True when both results agree on everything except timing
    pub fn same_outcome(&self, other: &CheckResult) -> bool {
        self.check_type == other.check_type
            && self.name == other.name
            && self.expression == other.expression
            && self.passed == other.passed
            && self.expected == other.expected
            && self.actual == other.actual
            && self.error == other.error
    }
}

// ── Clause Boundary ───────────────────────────────────────

struct ClauseOutcome {
    passed: bool,
    expected: Option<Value>,
    actual: Option<Value>,
}

fn evaluate_clause(expr: &Expression, ctx: &EvaluationContext<'_>) -> EvalResult<ClauseOutcome> {
    match expr {
        Expression::Binary {
            op: BinaryOp::Implies,
            left,
            right,
        } => {
            if !evaluate_bool(left, ctx)? {
                return Ok(ClauseOutcome {
                    passed: true,
                    expected: None,
                    actual: None,
                });
            }
            evaluate_clause(right, ctx)
        }
        Expression::Binary { op, left, right } if op.is_comparison() => {
            let actual = evaluate(left, ctx)?;
            let expected = evaluate(right, ctx)?;
            let passed = apply_binary(*op, &actual, &expected)?
                .as_bool()
                .unwrap_or(false);
            Ok(ClauseOutcome {
                passed,
                expected: Some(expected),
                actual: Some(actual),
            })
        }
        _ => {
            let value = evaluate(expr, ctx)?;
            let passed = value
                .as_bool()
                .ok_or_else(|| EvalError::NotBoolean(value.type_name().to_string()))?;
            Ok(ClauseOutcome {
                passed,
                expected: Some(Value::Boolean(true)),
                actual: Some(value),
            })
        }
    }
}

/// Rename repeated clause names in place: the first occurrence keeps its
/// name, later ones get the first free `<name>#<k>` (k = 2, 3, ...).
pub fn make_names_unique(results: &mut [CheckResult]) {
    let mut seen = BTreeSet::new();
    for result in results.iter_mut() {
        if !seen.contains(&result.name) {
            seen.insert(result.name.clone());
            continue;
        }
        let mut k = 2;
        let mut candidate = format!("{}#{}", result.name, k);
        while seen.contains(&candidate) {
            k += 1;
            candidate = format!("{}#{}", result.name, k);
        }
        tracing::debug!(event = "clause.renamed", from = %result.name, to = %candidate);
        seen.insert(candidate.clone());
        result.name = candidate;
    }
}

/// Evaluate a single clause into a [`CheckResult`]. Never fails.
pub fn check_clause(
    check_type: CheckType,
    name: String,
    expr: &Expression,
    ctx: &EvaluationContext<'_>,
) -> CheckResult {
    let start = Instant::now();
    let outcome = evaluate_clause(expr, ctx);
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let expression = print_expression(expr);

    match outcome {
        Ok(o) => {
            if !o.passed {
                tracing::debug!(event = "clause.failed", clause = %name, expression = %expression);
            }
            CheckResult {
                check_type,
                name,
                expression,
                passed: o.passed,
                expected: o.expected,
                actual: o.actual,
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            tracing::debug!(event = "clause.failed", clause = %name, error = %e);
            CheckResult {
                check_type,
                name,
                expression,
                passed: false,
                expected: None,
                actual: None,
                error: Some(e.to_string()),
                duration_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Domain;
    use crate::store::EntityStore;

    fn run(expr: &Expression) -> CheckResult {
        let domain = Domain::new("D");
        let store = EntityStore::new();
        let input = Value::object([("amount", Value::from(5))]);
        let ctx = EvaluationContext::new(&domain, &store, &input);
        check_clause(CheckType::Precondition, "precondition_1".into(), expr, &ctx)
    }

    #[test]
    fn test_comparison_records_operands() {
        let result = run(&Expression::ident("amount").greater_than(Expression::int(10)));
        assert!(!result.passed);
        assert_eq!(result.actual, Some(Value::Integer(5)));
        assert_eq!(result.expected, Some(Value::Integer(10)));
        assert_eq!(result.expression, "amount > 10");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_evaluation_error_becomes_failed_result() {
        let result = run(&Expression::ident("missing").equals(Expression::int(1)));
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("unbound identifier 'missing'"));
    }

    #[test]
    fn test_implies_false_antecedent_never_evaluates_consequent() {
        let expr = Expression::ident("amount")
            .less_than(Expression::int(0))
            .implies(Expression::ident("missing").equals(Expression::int(1)));
        let result = run(&expr);
        assert!(result.passed);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_implies_true_antecedent_uses_consequent() {
        let holds = Expression::ident("amount")
            .greater_than(Expression::int(0))
            .implies(Expression::ident("amount").equals(Expression::int(5)));
        assert!(run(&holds).passed);

        let fails = Expression::ident("amount")
            .greater_than(Expression::int(0))
            .implies(Expression::ident("amount").equals(Expression::int(6)));
        let result = run(&fails);
        assert!(!result.passed);
        assert_eq!(result.actual, Some(Value::Integer(5)));
    }

    #[test]
    fn test_non_boolean_clause_fails() {
        let result = run(&Expression::ident("amount"));
        assert!(!result.passed);
        assert!(result.error.unwrap().contains("expected Boolean"));
    }

    #[test]
    fn test_check_result_json_shape() {
        let result = run(&Expression::bool(true));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "precondition");
        assert_eq!(json["name"], "precondition_1");
        assert_eq!(json["passed"], true);
        assert!(json.get("error").is_none());
    }
}
