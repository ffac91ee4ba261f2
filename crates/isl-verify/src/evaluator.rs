//! Expression evaluator - pure interpreter for ISL constraint expressions
//!
//! `evaluate(expr, ctx)` maps an [`Expression`] and an
//! [`EvaluationContext`] to a [`Value`]. The context is read-only, so
//! checkers can re-run any clause and get the same answer.
//!
//! # Identifier resolution
//!
//! 1. Variables bound in the context scope (`this`, entity aliases)
//! 2. The keywords `input`, `result` and `error`
//! 3. Fields of the input object
//! 4. Fields of the result object
//!
//! Anything else is an [`EvalError::UnboundIdentifier`].
//!
//! # Built-ins
//!
//! - `Entity.exists(id | criteria)`, `Entity.lookup(id | criteria)`,
//!   `Entity.count(criteria?)`, `Entity.all()`
//! - `old(expr)`: `expr` evaluated against the pre-execution snapshot
//! - `now()`: the trial timestamp as RFC 3339 text
//! - `len(x)`, `contains(x, item)`, `is_empty(x)`, `abs(x)`, `min(a, b)`,
//!   `max(a, b)`, plus the method forms `x.contains(item)`, `x.is_empty()`,
//!   `x.starts_with(s)`, `x.ends_with(s)` and the `x.length` property
//!
//! `and` / `or` short-circuit. `implies` never evaluates its right side
//! when the left side is false.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ast::{BinaryOp, Domain, Expression, UnaryOp};
use crate::error::{EvalError, EvalResult};
use crate::printer::print_expression;
use crate::store::{EntitySource, EntityStoreSnapshot};
use crate::value::Value;

const ENTITY_METHODS: [&str; 4] = ["exists", "lookup", "count", "all"];

// ── Evaluation Context ────────────────────────────────────

/// Read-only view of one verification trial
///
/// Cloning is cheap: everything but the variable scope is borrowed.
#[derive(Clone)]
pub struct EvaluationContext<'a> {
    domain: &'a Domain,
    store: &'a dyn EntitySource,
    snapshot: Option<&'a EntityStoreSnapshot>,
    input: &'a Value,
    result: Option<&'a Value>,
    error: Option<&'a Value>,
    now: DateTime<Utc>,
    scope: BTreeMap<String, Value>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(domain: &'a Domain, store: &'a dyn EntitySource, input: &'a Value) -> Self {
        EvaluationContext {
            domain,
            store,
            snapshot: None,
            input,
            result: None,
            error: None,
            now: Utc::now(),
            scope: BTreeMap::new(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: &'a EntityStoreSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_result(mut self, result: &'a Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Bind the execution error object (`{code, message, retriable}`)
    pub fn with_error(mut self, error: &'a Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Bind a variable in this context's scope
    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.scope.insert(name.into(), value);
        self
    }

    /// Copy of this context with an independent variable scope
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn domain(&self) -> &'a Domain {
        self.domain
    }

    pub fn store(&self) -> &'a dyn EntitySource {
        self.store
    }

    pub fn snapshot(&self) -> Option<&'a EntityStoreSnapshot> {
        self.snapshot
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn lookup_identifier(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.scope.get(name) {
            return Some(v.clone());
        }
        match name {
            "input" => return Some(self.input.clone()),
            "result" => return Some(self.result.cloned().unwrap_or(Value::Null)),
            "error" => return Some(self.error.cloned().unwrap_or(Value::Null)),
            _ => {}
        }
        if let Some(v) = self.input.get(name) {
            return Some(v.clone());
        }
        self.result.and_then(|r| r.get(name)).cloned()
    }

    fn is_bound(&self, name: &str) -> bool {
        self.lookup_identifier(name).is_some()
    }
}

// ── Public API ────────────────────────────────────────────

/// Evaluate an expression to a value
pub fn evaluate(expr: &Expression, ctx: &EvaluationContext<'_>) -> EvalResult<Value> {
    match expr {
        Expression::Literal { value } => Ok(value.clone()),
        Expression::Identifier { name } => ctx
            .lookup_identifier(name)
            .ok_or_else(|| EvalError::UnboundIdentifier(name.clone())),
        Expression::Member { object, property } => {
            let target = evaluate(object, ctx)?;
            member(&target, property)
        }
        Expression::Index { object, index } => {
            let target = evaluate(object, ctx)?;
            let key = evaluate(index, ctx)?;
            index_value(&target, &key)
        }
        Expression::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            unary(*op, value)
        }
        Expression::Binary { op, left, right } => binary(*op, left, right, ctx),
        Expression::Call { callee, arguments } => call(callee, arguments, ctx),
        Expression::Old { expression } => evaluate_old(expression, ctx),
        Expression::List { elements } => elements
            .iter()
            .map(|e| evaluate(e, ctx))
            .collect::<EvalResult<Vec<_>>>()
            .map(Value::Array),
        Expression::Object { fields } => fields
            .iter()
            .map(|f| Ok((f.key.clone(), evaluate(&f.value, ctx)?)))
            .collect::<EvalResult<BTreeMap<_, _>>>()
            .map(Value::Object),
    }
}

/// Evaluate an expression that must produce a Boolean
pub fn evaluate_bool(expr: &Expression, ctx: &EvaluationContext<'_>) -> EvalResult<bool> {
    let value = evaluate(expr, ctx)?;
    value
        .as_bool()
        .ok_or_else(|| EvalError::NotBoolean(value.type_name().to_string()))
}

// ── Member & Index ────────────────────────────────────────

fn member(target: &Value, property: &str) -> EvalResult<Value> {
    match target {
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::String(s) if property == "length" => Ok(Value::Integer(s.chars().count() as i64)),
        Value::Array(a) if property == "length" => Ok(Value::Integer(a.len() as i64)),
        other => Err(EvalError::NotAnObject {
            property: property.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

fn index_value(target: &Value, key: &Value) -> EvalResult<Value> {
    match (target, key) {
        (Value::Array(items), Value::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        _ => Err(mismatch("[]", target, key)),
    }
}

// ── Operators ─────────────────────────────────────────────

fn mismatch(operator: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        operator: operator.to_string(),
        left: left.type_name().to_string(),
        right: right.type_name().to_string(),
    }
}

fn expect_bool(value: &Value, operator: BinaryOp) -> EvalResult<bool> {
    value.as_bool().ok_or_else(|| EvalError::TypeMismatch {
        operator: operator.as_str().to_string(),
        left: value.type_name().to_string(),
        right: "Boolean".to_string(),
    })
}

fn unary(op: UnaryOp, value: Value) -> EvalResult<Value> {
    match (op, &value) {
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Neg, Value::Integer(i)) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| EvalError::Overflow("-".to_string())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        _ => Err(EvalError::TypeMismatch {
            operator: op.as_str().to_string(),
            left: value.type_name().to_string(),
            right: "-".to_string(),
        }),
    }
}

fn binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    ctx: &EvaluationContext<'_>,
) -> EvalResult<Value> {
    // Lazy operators first: the right side may never be evaluated
    match op {
        BinaryOp::And => {
            let l = expect_bool(&evaluate(left, ctx)?, op)?;
            if !l {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(expect_bool(&evaluate(right, ctx)?, op)?));
        }
        BinaryOp::Or => {
            let l = expect_bool(&evaluate(left, ctx)?, op)?;
            if l {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(expect_bool(&evaluate(right, ctx)?, op)?));
        }
        BinaryOp::Implies => {
            let l = expect_bool(&evaluate(left, ctx)?, op)?;
            if !l {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(expect_bool(&evaluate(right, ctx)?, op)?));
        }
        _ => {}
    }

    let l = evaluate(left, ctx)?;
    let r = evaluate(right, ctx)?;
    apply_binary(op, &l, &r)
}

/// Apply a strict (non-lazy) binary operator to two evaluated operands
pub fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Boolean(l.loose_eq(r))),
        BinaryOp::NotEq => Ok(Value::Boolean(!l.loose_eq(r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = l
                .partial_order(r)
                .ok_or_else(|| mismatch(op.as_str(), l, r))?;
            let holds = match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Value::Boolean(holds))
        }
        BinaryOp::In => match (l, r) {
            (_, Value::Array(items)) => Ok(Value::Boolean(items.iter().any(|i| i.loose_eq(l)))),
            (Value::String(needle), Value::String(hay)) => {
                Ok(Value::Boolean(hay.contains(needle.as_str())))
            }
            (Value::String(key), Value::Object(map)) => Ok(Value::Boolean(map.contains_key(key))),
            _ => Err(mismatch("in", l, r)),
        },
        BinaryOp::Add => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(op, l, r, i64::checked_add, |a, b| a + b),
        },
        BinaryOp::Sub => arithmetic(op, l, r, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(op, l, r, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => match (l, r) {
            (Value::Integer(_), Value::Integer(0)) => Err(EvalError::DivisionByZero),
            (Value::Integer(a), Value::Integer(b)) if a.checked_rem(*b) == Some(0) => a
                .checked_div(*b)
                .map(Value::Integer)
                .ok_or_else(|| EvalError::Overflow("/".to_string())),
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => Err(EvalError::DivisionByZero),
                (Some(a), Some(b)) => Ok(Value::Float(a / b)),
                _ => Err(mismatch("/", l, r)),
            },
        },
        BinaryOp::Mod => match (l, r) {
            (Value::Integer(_), Value::Integer(0)) => Err(EvalError::DivisionByZero),
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_rem(*b)
                .map(Value::Integer)
                .ok_or_else(|| EvalError::Overflow("%".to_string())),
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => Err(EvalError::DivisionByZero),
                (Some(a), Some(b)) => Ok(Value::Float(a % b)),
                _ => Err(mismatch("%", l, r)),
            },
        },
        BinaryOp::And | BinaryOp::Or | BinaryOp::Implies => {
            let a = expect_bool(l, op)?;
            let b = expect_bool(r, op)?;
            let v = match op {
                BinaryOp::And => a && b,
                BinaryOp::Or => a || b,
                _ => !a || b,
            };
            Ok(Value::Boolean(v))
        }
    }
}

fn arithmetic(
    op: BinaryOp,
    l: &Value,
    r: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b)
            .map(Value::Integer)
            .ok_or_else(|| EvalError::Overflow(op.as_str().to_string())),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
            _ => Err(mismatch(op.as_str(), l, r)),
        },
    }
}

// ── old() ─────────────────────────────────────────────────

fn evaluate_old(expr: &Expression, ctx: &EvaluationContext<'_>) -> EvalResult<Value> {
    let snapshot = ctx.snapshot.ok_or(EvalError::MissingSnapshot)?;
    let mut before = ctx.fork();
    before.store = snapshot;
    evaluate(expr, &before)
}

// ── Calls ─────────────────────────────────────────────────

fn call(
    callee: &Expression,
    arguments: &[Expression],
    ctx: &EvaluationContext<'_>,
) -> EvalResult<Value> {
    match callee {
        Expression::Member { object, property } => {
            if let Expression::Identifier { name } = object.as_ref() {
                if !ctx.is_bound(name) {
                    if ENTITY_METHODS.contains(&property.as_str()) {
                        return entity_builtin(name, property, arguments, ctx);
                    }
                    if ctx.domain.entity(name).is_some() {
                        return Err(EvalError::UnknownFunction(format!("{}.{}", name, property)));
                    }
                    return Err(EvalError::UnboundIdentifier(name.clone()));
                }
            }
            let target = evaluate(object, ctx)?;
            let args = evaluate_args(arguments, ctx)?;
            value_method(&target, property, &args)
        }
        Expression::Identifier { name } => function(name, arguments, ctx),
        other => Err(EvalError::UnknownFunction(print_expression(other))),
    }
}

fn evaluate_args(arguments: &[Expression], ctx: &EvaluationContext<'_>) -> EvalResult<Vec<Value>> {
    arguments.iter().map(|a| evaluate(a, ctx)).collect()
}

fn arity(function: &str, expected: &str, found: usize) -> EvalError {
    EvalError::Arity {
        function: function.to_string(),
        expected: expected.to_string(),
        found,
    }
}

/// Turn an entity built-in argument into a field filter. A scalar is
/// shorthand for `{ id: scalar }`.
fn criteria_from(arg: Value) -> BTreeMap<String, Value> {
    match arg {
        Value::Object(map) => map,
        other => BTreeMap::from([("id".to_string(), other)]),
    }
}

fn entity_builtin(
    entity: &str,
    method: &str,
    arguments: &[Expression],
    ctx: &EvaluationContext<'_>,
) -> EvalResult<Value> {
    if ctx.domain.entity(entity).is_none() {
        return Err(EvalError::UnknownEntity(entity.to_string()));
    }
    let qualified = format!("{}.{}", entity, method);
    let mut args = evaluate_args(arguments, ctx)?;
    if args.len() > 1 {
        return Err(arity(&qualified, "0 or 1", args.len()));
    }
    let criteria = args.pop().map(criteria_from).unwrap_or_default();
    let store = ctx.store;

    match method {
        "exists" => Ok(Value::Boolean(store.exists(entity, &criteria))),
        "lookup" => Ok(store
            .lookup(entity, &criteria)
            .map(|inst| inst.to_value())
            .unwrap_or(Value::Null)),
        "count" => Ok(Value::Integer(store.count(entity, &criteria) as i64)),
        _ => {
            if !arguments.is_empty() {
                return Err(arity(&qualified, "0", arguments.len()));
            }
            Ok(Value::Array(
                store.get_all(entity).iter().map(|i| i.to_value()).collect(),
            ))
        }
    }
}

fn function(name: &str, arguments: &[Expression], ctx: &EvaluationContext<'_>) -> EvalResult<Value> {
    match name {
        "old" => match arguments {
            [inner] => evaluate_old(inner, ctx),
            _ => Err(arity("old", "1", arguments.len())),
        },
        "now" => {
            if !arguments.is_empty() {
                return Err(arity("now", "0", arguments.len()));
            }
            Ok(Value::String(
                ctx.now.to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
        }
        "len" | "length" => match evaluate_args(arguments, ctx)?.as_slice() {
            [v] => length(v, name),
            args => Err(arity(name, "1", args.len())),
        },
        "contains" => match evaluate_args(arguments, ctx)?.as_slice() {
            [haystack, needle] => value_method(haystack, "contains", std::slice::from_ref(needle)),
            args => Err(arity(name, "2", args.len())),
        },
        "is_empty" => match evaluate_args(arguments, ctx)?.as_slice() {
            [v] => value_method(v, "is_empty", &[]),
            args => Err(arity(name, "1", args.len())),
        },
        "abs" => match evaluate_args(arguments, ctx)?.as_slice() {
            [Value::Integer(i)] => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| EvalError::Overflow("abs".to_string())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            [other] => Err(mismatch("abs", other, other)),
            args => Err(arity(name, "1", args.len())),
        },
        "min" | "max" => match evaluate_args(arguments, ctx)?.as_slice() {
            [a, b] => {
                let ord = a.partial_order(b).ok_or_else(|| mismatch(name, a, b))?;
                let pick_a = if name == "min" {
                    ord != Ordering::Greater
                } else {
                    ord != Ordering::Less
                };
                Ok(if pick_a { a.clone() } else { b.clone() })
            }
            args => Err(arity(name, "2", args.len())),
        },
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn length(value: &Value, operator: &str) -> EvalResult<Value> {
    match value {
        Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
        Value::Array(a) => Ok(Value::Integer(a.len() as i64)),
        Value::Object(o) => Ok(Value::Integer(o.len() as i64)),
        other => Err(mismatch(operator, other, other)),
    }
}

fn value_method(target: &Value, method: &str, args: &[Value]) -> EvalResult<Value> {
    match (method, target, args) {
        ("contains", Value::Array(items), [needle]) => {
            Ok(Value::Boolean(items.iter().any(|i| i.loose_eq(needle))))
        }
        ("contains", Value::String(s), [Value::String(needle)]) => {
            Ok(Value::Boolean(s.contains(needle.as_str())))
        }
        ("contains", Value::Object(map), [Value::String(key)]) => {
            Ok(Value::Boolean(map.contains_key(key)))
        }
        ("is_empty", Value::Null, []) => Ok(Value::Boolean(true)),
        ("is_empty", v, []) => Ok(Value::Boolean(length(v, method)? == Value::Integer(0))),
        ("length" | "len", v, []) => length(v, method),
        ("starts_with", Value::String(s), [Value::String(p)]) => {
            Ok(Value::Boolean(s.starts_with(p.as_str())))
        }
        ("ends_with", Value::String(s), [Value::String(p)]) => {
            Ok(Value::Boolean(s.ends_with(p.as_str())))
        }
        ("contains" | "starts_with" | "ends_with", v, [arg]) => Err(mismatch(method, v, arg)),
        ("contains" | "starts_with" | "ends_with", _, _) => Err(arity(method, "1", args.len())),
        _ => Err(EvalError::UnknownFunction(format!(
            "{}.{}",
            target.type_name(),
            method
        ))),
    }
}
