//! ISL Verify - contract verification runtime for the Intent Specification Language
//!
//! Decides, for one invocation of one behavior, whether an implementation
//! satisfies the behavior's declared contract.
//!
//! # Architecture
//!
//! ```text
//! Domain (AST) ──► VerificationEngine ──► Implementation::execute
//!                        │
//!                        ├─ Precondition / Postcondition / Invariant checkers
//!                        │        └─ Evaluator ◄── EntityStore + Snapshot
//!                        ├─ Verdict / Scoring
//!                        └─ VerifyResult ──► Reporter
//! ```
//!
//! # Guarantees
//!
//! - **Pure evaluation**: clauses are evaluated against a read-only context
//! - **Full attribution**: no category short-circuits; every clause gets a
//!   uniquely named result
//! - **Snapshot isolation**: `old(expr)` reads a deep copy taken before
//!   execution, never the live store
//! - **Verdicts are data**: `risky` and `unsafe` are ordinary results, only
//!   fatal setup problems are errors

pub mod ast;
pub mod checker;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod printer;
pub mod report;
pub mod store;
pub mod telemetry;
pub mod trace;
pub mod value;
pub mod verdict;

pub use ast::{
    Behavior, BinaryOp, Domain, Entity, ErrorSpec, Expression, Field, InvariantBlock,
    PostCondition, PostconditionBlock, UnaryOp,
};
pub use checker::{CheckResult, CheckType, Outcome};
pub use config::VerifyConfig;
pub use engine::{
    classify_outcome, ExecutionError, ExecutionResult, FixedInputs, GeneratedInput,
    Implementation, InputCategory, InputProvider, MutationVerifyResult, TimingInfo,
    VerificationEngine, VerifyResult,
};
pub use error::{Error, EvalError, EvalResult, Result};
pub use evaluator::{evaluate, EvaluationContext};
pub use report::{format_batch, format_result, BatchSummary, ReportFormat};
pub use store::{EntityInstance, EntitySource, EntityStore, EntityStoreSnapshot, StoreError};
pub use value::Value;
pub use verdict::{compute_score, CategoryCoverage, Coverage, Verdict, VerdictPolicy};
