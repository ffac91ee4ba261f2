//! Checker and scoring properties that must hold for any domain

mod common;

use isl_verify::checker::{
    check_all_invariants, check_postconditions, check_preconditions, CheckResult, CheckType,
};
use isl_verify::verdict::{DeclaredClauses, Scoring};
use isl_verify::{
    compute_score, evaluate, Behavior, Domain, EntityStore, EvalError, EvaluationContext,
    Expression, Outcome, PostCondition, Value, VerdictPolicy,
};

fn ctx<'a>(domain: &'a Domain, store: &'a EntityStore, input: &'a Value) -> EvaluationContext<'a> {
    EvaluationContext::new(domain, store, input)
}

#[test]
fn test_n_preconditions_yield_n_uniquely_named_results() {
    let domain = Domain::new("D");
    let store = EntityStore::new();
    let input = Value::object([("x", Value::from(3))]);

    for n in 0..8 {
        let mut behavior = Behavior::new("B");
        for i in 0..n {
            // alternate passing, failing and erroring clauses
            let clause = match i % 3 {
                0 => Expression::ident("x").greater_than(Expression::int(0)),
                1 => Expression::ident("x").less_than(Expression::int(0)),
                _ => Expression::ident("undefined_name").equals(Expression::int(0)),
            };
            behavior = behavior.with_precondition(clause);
        }

        let results = check_preconditions(&behavior, &ctx(&domain, &store, &input));
        assert_eq!(results.len(), n);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.name, format!("precondition_{}", i + 1));
            assert_eq!(r.check_type, CheckType::Precondition);
        }
    }
}

#[test]
fn test_success_and_any_error_blocks_are_exclusive() {
    let behavior = Behavior::new("B")
        .with_postconditions(PostCondition::Success, vec![Expression::bool(true)])
        .with_postconditions(PostCondition::AnyError, vec![Expression::bool(true)]);
    let domain = Domain::new("D");
    let store = EntityStore::new();
    let input = Value::Null;

    let outcomes = [
        Outcome::Success,
        Outcome::Error("TIMEOUT".into()),
        Outcome::Error("UNKNOWN_ERROR".into()),
        Outcome::Error("success_like".into()),
    ];
    for outcome in outcomes {
        let results = check_postconditions(&behavior, &ctx(&domain, &store, &input), &outcome);
        assert_eq!(results.len(), 1, "outcome {}", outcome);
        let expected = if outcome.is_success() {
            "postcondition_success_1"
        } else {
            "postcondition_any_error_1"
        };
        assert_eq!(results[0].name, expected);
    }
}

#[test]
fn test_false_antecedent_never_evaluates_consequent() {
    let domain = Domain::new("D");
    let store = EntityStore::new();
    let input = Value::object([("flag", Value::from(false))]);

    // every consequent here would raise an evaluation error
    let consequents = vec![
        Expression::ident("missing"),
        Expression::int(1).plus(Expression::string("a")),
        Expression::old(Expression::ident("flag")),
        Expression::ident("Ghost").method("exists", vec![Expression::int(1)]),
        Expression::binary(isl_verify::BinaryOp::Div, Expression::int(1), Expression::int(0)),
    ];

    for consequent in consequents {
        let clause = Expression::ident("flag").implies(consequent.clone());
        let behavior = Behavior::new("B").with_postconditions(PostCondition::Success, vec![clause]);
        let results =
            check_postconditions(&behavior, &ctx(&domain, &store, &input), &Outcome::Success);
        assert!(results[0].passed, "{}", consequent);
        assert!(results[0].error.is_none());

        // the same consequent on its own does fail
        assert!(evaluate(&consequent, &ctx(&domain, &store, &input)).is_err());
    }
}

#[test]
fn test_true_antecedent_takes_consequent_outcome() {
    let domain = Domain::new("D");
    let store = EntityStore::new();
    let input = Value::object([("flag", Value::from(true))]);

    for consequent in [true, false] {
        let clause = Expression::ident("flag").implies(Expression::bool(consequent));
        let behavior = Behavior::new("B").with_postconditions(PostCondition::Success, vec![clause]);
        let results =
            check_postconditions(&behavior, &ctx(&domain, &store, &input), &Outcome::Success);
        assert_eq!(results[0].passed, consequent);
    }
}

#[test]
fn test_invariants_are_idempotent_over_unmodified_store() {
    let domain = common::counter_domain_with_boundary(true).with_entity(
        isl_verify::Entity::new("Ledger")
            .with_invariant(Expression::path("this.balance").at_least(Expression::int(0))),
    );
    let mut store = common::seeded_store(3);
    for (id, balance) in [("l1", 10), ("l2", -4), ("l3", 0)] {
        store
            .insert_value(
                "Ledger",
                Value::object([("id", Value::from(id)), ("balance", Value::from(balance))]),
            )
            .unwrap();
    }
    let input = Value::object([("id", Value::from("c1"))]);
    let result = Value::object([("value", Value::from(3))]);
    let behavior = domain.behavior("Increment").unwrap().clone();
    let context = ctx(&domain, &store, &input).with_result(&result);

    let first = check_all_invariants(&behavior, &context);
    let second = check_all_invariants(&behavior, &context);
    assert_eq!(first.len(), 5);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(a.same_outcome(b), "{} differs", a.name);
    }
    assert_eq!(first[2].name, "Ledger_l1_invariant_1");
    assert!(!first[3].passed);
}

fn clause(name: &str, passed: bool) -> CheckResult {
    CheckResult {
        check_type: CheckType::Invariant,
        name: name.to_string(),
        expression: "x".to_string(),
        passed,
        expected: None,
        actual: None,
        error: None,
        duration_ms: 0.0,
    }
}

#[test]
fn test_flipping_a_pass_to_fail_never_raises_score() {
    let policy = VerdictPolicy::default();
    let patterns: [&[bool]; 5] = [
        &[true],
        &[true, true, false],
        &[true, false, true, true, true, true, true],
        &[true; 10],
        &[false, false, true],
    ];

    for pattern in patterns {
        let results: Vec<_> = pattern
            .iter()
            .enumerate()
            .map(|(i, p)| clause(&format!("c{}", i), *p))
            .collect();
        let declared = DeclaredClauses {
            invariants: results.len(),
            ..Default::default()
        };
        let base = Scoring::aggregate(&[], &[], &results, declared, &policy);

        for i in 0..results.len() {
            if !results[i].passed {
                continue;
            }
            let mut flipped = results.clone();
            flipped[i].passed = false;
            let after = Scoring::aggregate(&[], &[], &flipped, declared, &policy);
            assert!(after.score <= base.score);
            assert!(!after.success);
        }
    }
    assert_eq!(compute_score(0, 5), 0);
}

#[test]
fn test_old_reads_snapshot_not_live_store() {
    let domain = common::counter_domain();
    let mut store = common::seeded_store(1);
    let snapshot = store.snapshot();
    let input = Value::object([("id", Value::from("c1"))]);
    let old_value = Expression::old(
        Expression::ident("Counter")
            .method("lookup", vec![Expression::ident("id")])
            .member("value"),
    );

    for next in [2, 50, -7] {
        let mut changes = std::collections::BTreeMap::new();
        changes.insert("value".to_string(), Value::from(next));
        store.update("Counter", "c1", changes).unwrap();
        let context = ctx(&domain, &store, &input).with_snapshot(&snapshot);
        assert_eq!(evaluate(&old_value, &context), Ok(Value::Integer(1)));
    }

    store.delete("Counter", "c1").unwrap();
    let context = ctx(&domain, &store, &input).with_snapshot(&snapshot);
    assert_eq!(evaluate(&old_value, &context), Ok(Value::Integer(1)));

    let without = ctx(&domain, &store, &input);
    assert_eq!(evaluate(&old_value, &without), Err(EvalError::MissingSnapshot));
}
