//! Error types for the verification runtime
//!
//! Two classes of failure exist and they never mix:
//!
//! - [`EvalError`] is raised while evaluating a single clause. It is always
//!   caught at the clause boundary and recorded in a failed `CheckResult`.
//! - [`Error`] is fatal for a trial (missing behavior, adapter setup failure,
//!   invalid configuration). It is the only error that escapes the engine.
//!
//! Failures of the implementation under test are neither: they are data
//! (`ExecutionResult::error`) that select which postcondition blocks apply.

use crate::store::StoreError;

/// Fatal verification error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The domain failed structural validation
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// The requested behavior is not declared in the domain
    #[error("behavior '{0}' not found in domain")]
    UnknownBehavior(String),

    /// The adapter could not prepare the entity store
    #[error("implementation setup failed: {0}")]
    Setup(String),

    /// The trial was cancelled before the implementation was invoked
    #[error("trial cancelled before execution")]
    Cancelled,

    /// Invalid verifier configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Entity store mutation failed during seeding
    #[error("entity store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for fatal verification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Clause-level evaluation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unbound identifier '{0}'")]
    UnboundIdentifier(String),

    #[error("cannot access member '{property}' on {found}")]
    NotAnObject { property: String, found: String },

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("old() requires a pre-execution snapshot, none was taken")]
    MissingSnapshot,

    #[error("type mismatch in '{operator}': {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: String,
        right: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{0}'")]
    Overflow(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("'{function}' expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("clause evaluated to {0}, expected Boolean")]
    NotBoolean(String),
}

/// Result type alias for expression evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;
