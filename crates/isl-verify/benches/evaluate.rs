// Benchmarks for the clause evaluation hot path
//
// - single expression evaluation against a populated store
// - `old()` reads through a snapshot
// - full invariant pass over many entity instances

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use isl_verify::checker::check_all_invariants;
use isl_verify::{evaluate, Behavior, Domain, Entity, EntityStore, EvaluationContext, Expression, Value};

fn store_with(count: usize) -> EntityStore {
    let mut store = EntityStore::new();
    for i in 0..count {
        store
            .insert_value(
                "Account",
                Value::object([
                    ("id", Value::from(format!("a{}", i))),
                    ("balance", Value::from(i as i64)),
                ]),
            )
            .unwrap();
    }
    store
}

fn domain() -> Domain {
    Domain::new("Bank")
        .with_entity(
            Entity::new("Account")
                .with_field("balance", "Int")
                .with_invariant(Expression::path("this.balance").at_least(Expression::int(0))),
        )
        .with_behavior(Behavior::new("Deposit"))
}

fn bench_evaluate(c: &mut Criterion) {
    let domain = domain();
    let store = store_with(100);
    let input = Value::object([("id", Value::from("a42")), ("amount", Value::from(10))]);

    let lookup = Expression::ident("Account")
        .method("lookup", vec![Expression::ident("id")])
        .member("balance")
        .plus(Expression::path("input.amount"))
        .greater_than(Expression::int(0));
    c.bench_function("evaluate_lookup_arithmetic", |b| {
        let ctx = EvaluationContext::new(&domain, &store, &input);
        b.iter(|| evaluate(black_box(&lookup), &ctx))
    });

    let snapshot = store.snapshot();
    let old = Expression::old(
        Expression::ident("Account")
            .method("lookup", vec![Expression::ident("id")])
            .member("balance"),
    );
    c.bench_function("evaluate_old_snapshot", |b| {
        let ctx = EvaluationContext::new(&domain, &store, &input).with_snapshot(&snapshot);
        b.iter(|| evaluate(black_box(&old), &ctx))
    });
}

fn bench_invariants(c: &mut Criterion) {
    let domain = domain();
    let behavior = Behavior::new("Deposit");
    let input = Value::Null;
    let mut group = c.benchmark_group("entity_invariants");

    for count in [10, 100, 1000] {
        let store = store_with(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &store, |b, store| {
            let ctx = EvaluationContext::new(&domain, store, &input);
            b.iter(|| check_all_invariants(black_box(&behavior), &ctx))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_invariants);
criterion_main!(benches);
