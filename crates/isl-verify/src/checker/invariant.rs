//! Invariant checking at behavior, domain and entity granularity
//!
//! Entity invariants are instantiated once per live instance: for each
//! instance the clause runs in a forked scope where `this` and the
//! lower-cased entity name are bound to the instance.

use super::{check_clause, make_names_unique, CheckResult, CheckType};
use crate::ast::{Behavior, Domain};
use crate::evaluator::EvaluationContext;

/// `behavior_<n>` for every behavior-level invariant
pub fn check_behavior_invariants(
    behavior: &Behavior,
    ctx: &EvaluationContext<'_>,
) -> Vec<CheckResult> {
    behavior
        .invariants
        .iter()
        .enumerate()
        .map(|(i, expr)| {
            check_clause(
                CheckType::Invariant,
                format!("behavior_{}", i + 1),
                expr,
                ctx,
            )
        })
        .collect()
}

/// `<block>_<n>` for every predicate of every domain invariant block
pub fn check_domain_invariants(domain: &Domain, ctx: &EvaluationContext<'_>) -> Vec<CheckResult> {
    domain
        .invariants
        .iter()
        .flat_map(|block| {
            block.predicates.iter().enumerate().map(move |(i, expr)| {
                check_clause(
                    CheckType::Invariant,
                    format!("{}_{}", block.name, i + 1),
                    expr,
                    ctx,
                )
            })
        })
        .collect()
}

/// `<Entity>_<id>_invariant_<n>` for every (live instance, entity invariant) pair
pub fn check_entity_invariants(domain: &Domain, ctx: &EvaluationContext<'_>) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for entity in &domain.entities {
        if entity.invariants.is_empty() {
            continue;
        }
        let alias = entity.name.to_lowercase();
        for instance in ctx.store().get_all(&entity.name) {
            let value = instance.to_value();
            let scoped = ctx
                .fork()
                .bind("this", value.clone())
                .bind(alias.clone(), value);
            for (i, expr) in entity.invariants.iter().enumerate() {
                results.push(check_clause(
                    CheckType::Invariant,
                    format!("{}_{}_invariant_{}", entity.name, instance.id, i + 1),
                    expr,
                    &scoped,
                ));
            }
        }
    }

    results
}

/// Behavior, domain and entity invariants, in that order
///
/// Entity names and ids may contain `_`, so two instances can format to
/// the same clause name; repeats are suffixed with `#<k>`.
pub fn check_all_invariants(behavior: &Behavior, ctx: &EvaluationContext<'_>) -> Vec<CheckResult> {
    let domain = ctx.domain();
    let mut results = check_behavior_invariants(behavior, ctx);
    results.extend(check_domain_invariants(domain, ctx));
    results.extend(check_entity_invariants(domain, ctx));
    make_names_unique(&mut results);
    results
}

pub fn all_invariants_passed(results: &[CheckResult]) -> bool {
    results.iter().all(|r| r.passed)
}

/// Number of invariant clauses that [`check_all_invariants`] would produce
/// against the context's current store
pub fn instantiated_invariant_count(behavior: &Behavior, ctx: &EvaluationContext<'_>) -> usize {
    let domain = ctx.domain();
    let domain_level: usize = domain.invariants.iter().map(|b| b.predicates.len()).sum();
    let entity_level: usize = domain
        .entities
        .iter()
        .map(|e| e.invariants.len() * ctx.store().get_all(&e.name).len())
        .sum();
    behavior.invariants.len() + domain_level + entity_level
}
