//! Precondition checking against the pre-execution state

use super::{check_clause, CheckResult, CheckType};
use crate::ast::Behavior;
use crate::evaluator::EvaluationContext;

/// Evaluate every precondition of `behavior` in declaration order
///
/// Returns exactly one result per precondition, named
/// `precondition_1..N`. A failing clause does not stop the rest.
pub fn check_preconditions(behavior: &Behavior, ctx: &EvaluationContext<'_>) -> Vec<CheckResult> {
    behavior
        .preconditions
        .iter()
        .enumerate()
        .map(|(i, expr)| {
            check_clause(
                CheckType::Precondition,
                format!("precondition_{}", i + 1),
                expr,
                ctx,
            )
        })
        .collect()
}
