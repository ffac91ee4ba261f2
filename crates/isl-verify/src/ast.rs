//! ISL AST - the read-only specification model consumed by the verifier
//!
//! The specification parser is an external collaborator. It hands the
//! verifier a [`Domain`] either directly or as JSON; this module defines
//! that model and nothing else.
//!
//! All AST types are immutable after construction and are shared
//! read-only (`Arc<Domain>`) across concurrent verification trials.
//!
//! Expressions are a closed sum type: every consumer (evaluator,
//! printer, checkers) matches exhaustively, so adding a node kind is a
//! compile error everywhere it is not yet handled.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value::Value;
use crate::{Error, Result};

// ── Domain ────────────────────────────────────────────────

/// A parsed specification unit: entities, behaviors and domain invariants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    /// Domain-level invariant blocks
    #[serde(default)]
    pub invariants: Vec<InvariantBlock>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Domain {
            name: name.into(),
            version: String::new(),
            entities: Vec::new(),
            behaviors: Vec::new(),
            invariants: Vec::new(),
        }
    }

    /// Load a domain from the JSON form emitted by the ISL parser
    pub fn from_json_str(json: &str) -> Result<Self> {
        let domain: Domain = serde_json::from_str(json)?;
        domain.validate()?;
        Ok(domain)
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn with_invariants(mut self, block: InvariantBlock) -> Self {
        self.invariants.push(block);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn behavior(&self, name: &str) -> Option<&Behavior> {
        self.behaviors.iter().find(|b| b.name == name)
    }

    /// Check the structural rules the verifier relies on.
    ///
    /// - entity, behavior and invariant block names are unique
    /// - no invariant block name can produce a clause name of another
    ///   category: `behavior`, `precondition`, `postcondition*` and
    ///   `*_invariant` are reserved
    /// - a named-error postcondition refers to an error the behavior declares
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.name.as_str()) {
                return Err(Error::InvalidDomain(format!(
                    "duplicate entity '{}'",
                    entity.name
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for behavior in &self.behaviors {
            if !seen.insert(behavior.name.as_str()) {
                return Err(Error::InvalidDomain(format!(
                    "duplicate behavior '{}'",
                    behavior.name
                )));
            }
            for block in &behavior.postconditions {
                if let PostCondition::Named(code) = &block.condition {
                    if !behavior.errors.iter().any(|e| &e.name == code) {
                        return Err(Error::InvalidDomain(format!(
                            "behavior '{}' has a postcondition block for undeclared error '{}'",
                            behavior.name, code
                        )));
                    }
                }
            }
        }

        let mut seen = BTreeSet::new();
        for block in &self.invariants {
            if block.name.is_empty() || is_reserved_block_name(&block.name) {
                return Err(Error::InvalidDomain(format!(
                    "invalid invariant block name '{}'",
                    block.name
                )));
            }
            if !seen.insert(block.name.as_str()) {
                return Err(Error::InvalidDomain(format!(
                    "duplicate invariant block '{}'",
                    block.name
                )));
            }
        }

        Ok(())
    }

    /// SHA-256 of the canonical JSON form, lowercase hex
    pub fn fingerprint(&self) -> String {
        // Serializing plain structs, Vecs and BTreeMaps cannot fail.
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A typed field on an entity or behavior input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub optional: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            type_name: type_name.into(),
            optional: false,
        }
    }
}

/// Entity type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub invariants: Vec<Expression>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            fields: Vec::new(),
            invariants: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, type_name: &str) -> Self {
        self.fields.push(Field::new(name, type_name));
        self
    }

    pub fn with_invariant(mut self, expr: Expression) -> Self {
        self.invariants.push(expr);
        self
    }
}

/// A named error a behavior may raise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSpec {
    pub name: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retriable: bool,
}

/// A named operation and its contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input: Vec<Field>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorSpec>,
    #[serde(default)]
    pub preconditions: Vec<Expression>,
    #[serde(default)]
    pub postconditions: Vec<PostconditionBlock>,
    #[serde(default)]
    pub invariants: Vec<Expression>,
}

impl Behavior {
    pub fn new(name: impl Into<String>) -> Self {
        Behavior {
            name: name.into(),
            description: None,
            input: Vec::new(),
            output: None,
            errors: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            invariants: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: &str, type_name: &str) -> Self {
        self.input.push(Field::new(name, type_name));
        self
    }

    pub fn with_error(mut self, name: &str) -> Self {
        self.errors.push(ErrorSpec {
            name: name.to_string(),
            message: None,
            retriable: false,
        });
        self
    }

    pub fn with_precondition(mut self, expr: Expression) -> Self {
        self.preconditions.push(expr);
        self
    }

    pub fn with_postconditions(mut self, condition: PostCondition, predicates: Vec<Expression>) -> Self {
        self.postconditions.push(PostconditionBlock {
            condition,
            predicates,
        });
        self
    }

    pub fn with_invariant(mut self, expr: Expression) -> Self {
        self.invariants.push(expr);
        self
    }

    /// Total number of postcondition predicates across every block
    pub fn postcondition_count(&self) -> usize {
        self.postconditions.iter().map(|b| b.predicates.len()).sum()
    }
}

/// A group of postconditions guarded by an outcome condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostconditionBlock {
    pub condition: PostCondition,
    #[serde(default)]
    pub predicates: Vec<Expression>,
}

/// Outcome guard of a postcondition block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PostCondition {
    Success,
    AnyError,
    /// A specific declared error code
    Named(String),
}

impl PostCondition {
    pub fn as_str(&self) -> &str {
        match self {
            PostCondition::Success => "success",
            PostCondition::AnyError => "any_error",
            PostCondition::Named(code) => code,
        }
    }

    /// Whether a block with this condition runs for `outcome`
    pub fn applies_to(&self, outcome: &str) -> bool {
        match self {
            PostCondition::Success => outcome == "success",
            PostCondition::AnyError => outcome != "success",
            PostCondition::Named(code) => outcome == code,
        }
    }
}

impl From<String> for PostCondition {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => PostCondition::Success,
            "any_error" => PostCondition::AnyError,
            _ => PostCondition::Named(s),
        }
    }
}

impl From<&str> for PostCondition {
    fn from(s: &str) -> Self {
        PostCondition::from(s.to_string())
    }
}

impl From<PostCondition> for String {
    fn from(c: PostCondition) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for PostCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named block of domain-level invariants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantBlock {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub predicates: Vec<Expression>,
}

impl InvariantBlock {
    pub fn new(name: impl Into<String>, predicates: Vec<Expression>) -> Self {
        InvariantBlock {
            name: name.into(),
            description: None,
            predicates,
        }
    }
}

/// Block names whose `<block>_<n>` clauses could equal `behavior_<n>`,
/// `precondition_<n>`, `postcondition_<cond>_<n>` or
/// `<Entity>_<id>_invariant_<n>`
fn is_reserved_block_name(name: &str) -> bool {
    name == "behavior"
        || name == "precondition"
        || name.starts_with("postcondition")
        || name.ends_with("_invariant")
}

// ── Expressions ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "not")]
    Not,
    #[serde(rename = "-")]
    Neg,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "implies")]
    Implies,
    #[serde(rename = "in")]
    In,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Implies => "implies",
            BinaryOp::In => "in",
        }
    }

    /// Comparison operators produce Boolean results from two operands
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }
}

/// Key/value pair of an object literal (lookup criteria)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectField {
    pub key: String,
    pub value: Expression,
}

/// Constraint expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal {
        value: Value,
    },
    Identifier {
        name: String,
    },
    Member {
        object: Box<Expression>,
        property: String,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    /// Value of the inner expression in the pre-execution snapshot
    Old {
        expression: Box<Expression>,
    },
    List {
        elements: Vec<Expression>,
    },
    Object {
        fields: Vec<ObjectField>,
    },
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    pub fn int(i: i64) -> Self {
        Expression::literal(i)
    }

    pub fn float(f: f64) -> Self {
        Expression::literal(f)
    }

    pub fn string(s: &str) -> Self {
        Expression::literal(s)
    }

    pub fn bool(b: bool) -> Self {
        Expression::literal(b)
    }

    pub fn null() -> Self {
        Expression::Literal { value: Value::Null }
    }

    pub fn ident(name: &str) -> Self {
        Expression::Identifier {
            name: name.to_string(),
        }
    }

    /// Dotted path shorthand: `path("result.value")`
    pub fn path(dotted: &str) -> Self {
        let mut parts = dotted.split('.');
        let head = Expression::ident(parts.next().unwrap_or_default());
        parts.fold(head, |acc, part| acc.member(part))
    }

    pub fn member(self, property: &str) -> Self {
        Expression::Member {
            object: Box::new(self),
            property: property.to_string(),
        }
    }

    pub fn index(self, index: Expression) -> Self {
        Expression::Index {
            object: Box::new(self),
            index: Box::new(index),
        }
    }

    pub fn call(callee: Expression, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            callee: Box::new(callee),
            arguments,
        }
    }

    /// `Entity.method(args)` shorthand
    pub fn method(self, name: &str, arguments: Vec<Expression>) -> Self {
        Expression::call(self.member(name), arguments)
    }

    pub fn old(expression: Expression) -> Self {
        Expression::Old {
            expression: Box::new(expression),
        }
    }

    pub fn list(elements: Vec<Expression>) -> Self {
        Expression::List { elements }
    }

    pub fn object(fields: Vec<(&str, Expression)>) -> Self {
        Expression::Object {
            fields: fields
                .into_iter()
                .map(|(key, value)| ObjectField {
                    key: key.to_string(),
                    value,
                })
                .collect(),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn negated(self) -> Self {
        Expression::unary(UnaryOp::Not, self)
    }

    pub fn equals(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn not_equals(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::NotEq, self, rhs)
    }

    pub fn less_than(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn at_most(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Le, self, rhs)
    }

    pub fn greater_than(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn at_least(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn plus(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Add, self, rhs)
    }

    pub fn minus(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn and(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Or, self, rhs)
    }

    pub fn implies(self, rhs: Expression) -> Self {
        Expression::binary(BinaryOp::Implies, self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_domain() -> Domain {
        Domain::new("Counters")
            .with_entity(
                Entity::new("Counter")
                    .with_field("id", "String")
                    .with_field("value", "Int")
                    .with_invariant(Expression::path("this.value").at_least(Expression::int(0))),
            )
            .with_behavior(
                Behavior::new("Increment")
                    .with_input("id", "String")
                    .with_input("amount", "Int")
                    .with_error("COUNTER_NOT_FOUND")
                    .with_precondition(Expression::ident("amount").greater_than(Expression::int(0)))
                    .with_postconditions(
                        PostCondition::Named("COUNTER_NOT_FOUND".into()),
                        vec![Expression::bool(true)],
                    ),
            )
    }

    #[test]
    fn test_postcondition_applicability() {
        assert!(PostCondition::Success.applies_to("success"));
        assert!(!PostCondition::Success.applies_to("COUNTER_NOT_FOUND"));
        assert!(PostCondition::AnyError.applies_to("COUNTER_NOT_FOUND"));
        assert!(!PostCondition::AnyError.applies_to("success"));
        let named = PostCondition::Named("COUNTER_NOT_FOUND".into());
        assert!(named.applies_to("COUNTER_NOT_FOUND"));
        assert!(!named.applies_to("timeout"));
    }

    #[test]
    fn test_postcondition_serde_as_string() {
        let json = serde_json::to_string(&PostCondition::AnyError).unwrap();
        assert_eq!(json, "\"any_error\"");
        let parsed: PostCondition = serde_json::from_str("\"RATE_LIMITED\"").unwrap();
        assert_eq!(parsed, PostCondition::Named("RATE_LIMITED".into()));
    }

    #[test]
    fn test_expression_json_shape() {
        let expr = Expression::ident("amount").greater_than(Expression::int(0));
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["kind"], "binary");
        assert_eq!(json["op"], ">");
        assert_eq!(json["left"]["name"], "amount");
        let back: Expression = serde_json::from_value(json).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn test_path_builds_member_chain() {
        assert_eq!(
            Expression::path("result.value"),
            Expression::ident("result").member("value")
        );
    }

    #[test]
    fn test_validate_accepts_well_formed_domain() {
        assert!(counter_domain().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_undeclared_error_block() {
        let domain = Domain::new("D").with_behavior(
            Behavior::new("B").with_postconditions(PostCondition::Named("NOPE".into()), vec![]),
        );
        let err = domain.validate().unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let domain = Domain::new("D")
            .with_invariants(InvariantBlock::new("limits", vec![]))
            .with_invariants(InvariantBlock::new("limits", vec![]));
        assert!(domain.validate().is_err());

        let domain = Domain::new("D").with_invariants(InvariantBlock::new("behavior", vec![]));
        assert!(domain.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shadowing_block_names() {
        for name in ["precondition", "postcondition_success", "Counter_c1_invariant"] {
            let domain = counter_domain().with_invariants(InvariantBlock::new(name, vec![]));
            let err = domain.validate().unwrap_err();
            assert!(err.to_string().contains(name), "{}", name);
        }
        let domain = counter_domain().with_invariants(InvariantBlock::new("invariant_limits", vec![]));
        assert!(domain.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = counter_domain();
        assert_eq!(a.fingerprint(), counter_domain().fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        let b = a.clone().with_entity(Entity::new("Other"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_domain_json_roundtrip() {
        let domain = counter_domain();
        let json = serde_json::to_string(&domain).unwrap();
        let back = Domain::from_json_str(&json).unwrap();
        assert_eq!(back, domain);
    }
}
