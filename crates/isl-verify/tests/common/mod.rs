//! Shared fixtures: a counter domain and adapters that implement it
//! correctly or with injected defects.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use isl_verify::{
    Behavior, Domain, Entity, EntitySource, EntityStore, ExecutionError, ExecutionResult,
    Expression, GeneratedInput, Implementation, InvariantBlock, PostCondition, Value,
    VerificationEngine, VerifyConfig,
};

pub const NOT_FOUND: &str = "COUNTER_NOT_FOUND";

/// `Increment(id, amount)` and `Decrement(id, amount)` over `Counter { id, value }`
pub fn counter_domain() -> Domain {
    let old_value = Expression::old(
        Expression::ident("Counter")
            .method("lookup", vec![Expression::ident("id")])
            .member("value"),
    );

    let increment = Behavior::new("Increment")
        .with_input("id", "String")
        .with_input("amount", "Int")
        .with_error(NOT_FOUND)
        .with_precondition(Expression::ident("amount").greater_than(Expression::int(0)))
        .with_postconditions(
            PostCondition::Success,
            vec![Expression::path("result.value")
                .equals(old_value.clone().plus(Expression::path("input.amount")))],
        )
        .with_postconditions(
            PostCondition::Named(NOT_FOUND.into()),
            vec![Expression::ident("Counter")
                .method("exists", vec![Expression::ident("id")])
                .negated()],
        )
        .with_postconditions(
            PostCondition::AnyError,
            vec![Expression::path("error.code").not_equals(Expression::string(""))],
        )
        .with_invariant(
            Expression::ident("result")
                .not_equals(Expression::null())
                .implies(Expression::path("result.value").at_least(Expression::int(0))),
        );

    let decrement = Behavior::new("Decrement")
        .with_input("id", "String")
        .with_input("amount", "Int")
        .with_error(NOT_FOUND)
        .with_precondition(Expression::ident("amount").greater_than(Expression::int(0)))
        .with_postconditions(
            PostCondition::Success,
            vec![Expression::path("result.value")
                .equals(old_value.minus(Expression::path("input.amount")))],
        );

    Domain::new("Counters")
        .with_entity(Entity::new("Counter").with_field("value", "Int"))
        .with_behavior(increment)
        .with_behavior(decrement)
}

/// The counter domain plus a domain-level `invariant_boundary` block
pub fn counter_domain_with_boundary(strict: bool) -> Domain {
    let bound = Expression::path("result.value");
    let predicate = if strict {
        bound.greater_than(Expression::int(0))
    } else {
        bound.at_least(Expression::int(0))
    };
    counter_domain().with_invariants(InvariantBlock::new("invariant_boundary", vec![predicate]))
}

pub fn engine(domain: Domain) -> VerificationEngine {
    VerificationEngine::new(Arc::new(domain), VerifyConfig::default())
}

pub fn engine_with(domain: Domain, config: VerifyConfig) -> VerificationEngine {
    VerificationEngine::new(Arc::new(domain), config)
}

pub fn input(name: &str, id: &str, amount: i64) -> GeneratedInput {
    GeneratedInput::valid(
        name,
        Value::object([("id", Value::from(id)), ("amount", Value::from(amount))]),
    )
}

pub fn seeded_store(value: i64) -> EntityStore {
    let mut store = EntityStore::new();
    store
        .insert_value(
            "Counter",
            Value::object([("id", Value::from("c1")), ("value", Value::from(value))]),
        )
        .unwrap();
    store
}

/// Defects that can be injected into [`CounterService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defect {
    None,
    /// Adds one less than requested
    OffByOne,
    /// Never writes the new value back to the store
    LostUpdate,
}

/// Reference adapter for the counter domain
pub struct CounterService {
    pub initial: i64,
    pub defect: Defect,
    pub delay: Option<Duration>,
}

impl CounterService {
    pub fn new(initial: i64) -> Self {
        CounterService {
            initial,
            defect: Defect::None,
            delay: None,
        }
    }

    pub fn with_defect(mut self, defect: Defect) -> Self {
        self.defect = defect;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Implementation for CounterService {
    async fn execute(
        &self,
        behavior: &Behavior,
        input: &Value,
        store: &mut EntityStore,
    ) -> ExecutionResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let id = input.get("id").and_then(Value::as_str).unwrap_or_default();
        let amount = match input.get("amount") {
            Some(Value::Integer(n)) => *n,
            _ => 0,
        };
        let current = match store.get("Counter", id) {
            Some(instance) => match instance.fields.get("value") {
                Some(Value::Integer(v)) => *v,
                _ => 0,
            },
            None => {
                return ExecutionResult::err(ExecutionError::new(
                    NOT_FOUND,
                    format!("counter '{}' does not exist", id),
                ))
            }
        };

        let delta = match behavior.name.as_str() {
            "Decrement" => -amount,
            _ => amount,
        };
        let delta = if self.defect == Defect::OffByOne {
            delta - 1
        } else {
            delta
        };
        let next = current + delta;

        if self.defect != Defect::LostUpdate {
            let mut changes = BTreeMap::new();
            changes.insert("value".to_string(), Value::from(next));
            if let Err(e) = store.update("Counter", id, changes) {
                return ExecutionResult::err(ExecutionError::new("STORE_ERROR", e.to_string()));
            }
        }

        ExecutionResult::ok(Value::object([
            ("id", Value::from(id)),
            ("value", Value::from(next)),
        ]))
        .with_log(format!("{} {} -> {}", behavior.name, id, next))
    }

    fn setup(&self, store: &mut EntityStore) -> isl_verify::Result<()> {
        store.insert_value(
            "Counter",
            Value::object([("id", Value::from("c1")), ("value", Value::from(self.initial))]),
        )?;
        Ok(())
    }
}
