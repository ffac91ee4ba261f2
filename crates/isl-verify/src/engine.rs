//! Verification engine - runs one behavior trial end to end
//!
//! # Architecture
//!
//! ```text
//! seed store ─► preconditions ─► snapshot ─► execute (timeout) ─► classify outcome
//!                                                                      │
//!              verdict ◄─ invariants ◄─ postconditions (active blocks) ◄┘
//! ```
//!
//! The implementation call is the only suspension point. Evaluation,
//! checking and scoring are synchronous.
//!
//! # Guarantees
//!
//! - Every trial owns its `EntityStore`; the `Domain` is the only shared
//!   object and it is read-only
//! - Cancellation is honoured only before the implementation call; once
//!   issued, the trial runs to completion
//! - A timed out call becomes an execution error (`code = "timeout"`,
//!   `retriable = true`), never a hang
//! - Only fatal errors (unknown behavior, setup failure, cancellation)
//!   escape as `Err`; `risky` and `unsafe` verdicts are normal results

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ast::{Behavior, Domain};
use crate::checker::{
    check_all_invariants, check_postconditions, check_preconditions, instantiated_invariant_count,
    CheckResult,
};
pub use crate::checker::Outcome;
use crate::config::VerifyConfig;
use crate::evaluator::EvaluationContext;
use crate::store::EntityStore;
use crate::telemetry::{self, TrialSpan};
use crate::trace::{Trace, TraceRecorder};
use crate::value::Value;
use crate::verdict::{Coverage, DeclaredClauses, Scoring, Verdict};
use crate::{Error, Result};

/// Outcome code used when an execution error carries no code
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";
/// Outcome code of an execution that exceeded the configured timeout
pub const TIMEOUT_CODE: &str = "timeout";

// ── Implementation Adapter ────────────────────────────────

/// Error raised by the implementation under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retriable: bool,
}

impl ExecutionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError {
            code: code.into(),
            message: message.into(),
            retriable: false,
        }
    }

    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }

    /// `{code, message, retriable}`, the value bound to `error` in clauses
    pub fn to_value(&self) -> Value {
        Value::object([
            ("code", Value::from(self.code.as_str())),
            ("message", Value::from(self.message.as_str())),
            ("retriable", Value::from(self.retriable)),
        ])
    }
}

/// What the implementation reports back for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Filled in by the engine when the implementation leaves it at zero
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn ok(result: Value) -> Self {
        ExecutionResult {
            success: true,
            result: Some(result),
            error: None,
            duration_ms: 0.0,
            logs: Vec::new(),
        }
    }

    pub fn err(error: ExecutionError) -> Self {
        ExecutionResult {
            success: false,
            result: None,
            error: Some(error),
            duration_ms: 0.0,
            logs: Vec::new(),
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    fn timed_out(timeout_ms: u64) -> Self {
        ExecutionResult::err(
            ExecutionError::new(
                TIMEOUT_CODE,
                format!("execution exceeded {}ms timeout", timeout_ms),
            )
            .retriable(),
        )
    }
}

/// Adapter around the implementation under test
#[async_trait]
pub trait Implementation: Send + Sync {
    /// Run `behavior` once. Failures are reported in the result, not raised.
    async fn execute(
        &self,
        behavior: &Behavior,
        input: &Value,
        store: &mut EntityStore,
    ) -> ExecutionResult;

    /// Seed the entity store before any trial runs. A failure aborts
    /// verification.
    fn setup(&self, _store: &mut EntityStore) -> Result<()> {
        Ok(())
    }
}

/// `success` when there was no error, otherwise the error code
pub fn classify_outcome(execution: &ExecutionResult) -> Outcome {
    match &execution.error {
        Some(e) if !e.code.is_empty() => Outcome::Error(e.code.clone()),
        Some(_) => Outcome::Error(UNKNOWN_ERROR_CODE.to_string()),
        None if execution.success => Outcome::Success,
        None => Outcome::Error(UNKNOWN_ERROR_CODE.to_string()),
    }
}

// ── Generated Inputs ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputCategory {
    Valid,
    Boundary,
    Invalid,
}

/// One candidate argument set for a behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedInput {
    pub category: InputCategory,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub values: Value,
}

impl GeneratedInput {
    pub fn new(category: InputCategory, name: impl Into<String>, values: Value) -> Self {
        GeneratedInput {
            category,
            name: name.into(),
            description: String::new(),
            values,
        }
    }

    pub fn valid(name: impl Into<String>, values: Value) -> Self {
        Self::new(InputCategory::Valid, name, values)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Source of candidate inputs for a behavior
pub trait InputProvider: Send + Sync {
    fn generate(&self, behavior: &Behavior) -> Vec<GeneratedInput>;
}

/// Provider returning the same fixed inputs for every behavior
#[derive(Debug, Clone, Default)]
pub struct FixedInputs(pub Vec<GeneratedInput>);

impl InputProvider for FixedInputs {
    fn generate(&self, _behavior: &Behavior) -> Vec<GeneratedInput> {
        self.0.clone()
    }
}

// ── Results ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub total_ms: f64,
    pub precondition_ms: f64,
    pub execution_ms: f64,
    pub postcondition_ms: f64,
    pub invariant_ms: f64,
}

/// Final artifact of one verification trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub trial_id: Uuid,
    pub success: bool,
    pub verdict: Verdict,
    pub score: u8,
    pub behavior: String,
    pub input: GeneratedInput,
    pub preconditions: Vec<CheckResult>,
    pub postconditions: Vec<CheckResult>,
    pub invariants: Vec<CheckResult>,
    pub execution: ExecutionResult,
    pub outcome: Outcome,
    pub coverage: Coverage,
    pub timing: TimingInfo,
    pub spec_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

impl VerifyResult {
    /// Preconditions, postconditions and invariants in that order
    pub fn all_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.preconditions
            .iter()
            .chain(&self.postconditions)
            .chain(&self.invariants)
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.all_checks().filter(|c| !c.passed).collect()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.all_checks().find(|c| c.name == name)
    }
}

/// Narrow result consumed by the mutation-testing harness
///
/// Clause names and categories are carried through unchanged so fixtures
/// can assert on exact clauses such as `precondition_1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationVerifyResult {
    pub success: bool,
    pub verdict: Verdict,
    pub score: u8,
    pub preconditions: Vec<CheckResult>,
    pub postconditions: Vec<CheckResult>,
    pub invariants: Vec<CheckResult>,
}

impl MutationVerifyResult {
    /// Whether the named clause was evaluated and failed
    pub fn detected(&self, clause: &str) -> bool {
        self.preconditions
            .iter()
            .chain(&self.postconditions)
            .chain(&self.invariants)
            .any(|c| c.name == clause && !c.passed)
    }
}

impl From<&VerifyResult> for MutationVerifyResult {
    fn from(result: &VerifyResult) -> Self {
        MutationVerifyResult {
            success: result.success,
            verdict: result.verdict,
            score: result.score,
            preconditions: result.preconditions.clone(),
            postconditions: result.postconditions.clone(),
            invariants: result.invariants.clone(),
        }
    }
}

impl From<VerifyResult> for MutationVerifyResult {
    fn from(result: VerifyResult) -> Self {
        MutationVerifyResult {
            success: result.success,
            verdict: result.verdict,
            score: result.score,
            preconditions: result.preconditions,
            postconditions: result.postconditions,
            invariants: result.invariants,
        }
    }
}

// ── Engine ────────────────────────────────────────────────

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Explicitly constructed verifier for one domain
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    domain: Arc<Domain>,
    config: VerifyConfig,
    fingerprint: String,
}

impl VerificationEngine {
    pub fn new(domain: Arc<Domain>, config: VerifyConfig) -> Self {
        let fingerprint = domain.fingerprint();
        VerificationEngine {
            domain,
            config,
            fingerprint,
        }
    }

    /// Like [`new`](Self::new), but rejects an invalid domain or config
    pub fn try_new(domain: Arc<Domain>, config: VerifyConfig) -> Result<Self> {
        domain.validate()?;
        config.validate()?;
        Ok(Self::new(domain, config))
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    fn behavior(&self, name: &str) -> Result<&Behavior> {
        self.domain
            .behavior(name)
            .ok_or_else(|| Error::UnknownBehavior(name.to_string()))
    }

    /// Run the implementation's `setup` against a fresh store
    pub fn seed_store(&self, implementation: &dyn Implementation) -> Result<EntityStore> {
        let mut store = EntityStore::new();
        implementation.setup(&mut store).map_err(|e| match e {
            Error::Setup(_) => e,
            other => Error::Setup(other.to_string()),
        })?;
        Ok(store)
    }

    /// Run one trial against a store the trial owns
    pub async fn run_trial(
        &self,
        behavior: &str,
        implementation: &dyn Implementation,
        input: GeneratedInput,
        store: EntityStore,
        cancel: &CancellationToken,
    ) -> Result<VerifyResult> {
        let behavior = self.behavior(behavior)?;
        let trial_id = Uuid::new_v4();
        let span = TrialSpan::new(&trial_id.to_string(), &behavior.name, &input.name);
        span.instrument(self.execute_trial(trial_id, behavior, implementation, input, store, cancel))
            .await
    }

    async fn execute_trial(
        &self,
        trial_id: Uuid,
        behavior: &Behavior,
        implementation: &dyn Implementation,
        input: GeneratedInput,
        mut store: EntityStore,
        cancel: &CancellationToken,
    ) -> Result<VerifyResult> {
        let started = Instant::now();
        let now = Utc::now();
        let domain: &Domain = &self.domain;
        telemetry::emit_trial_started(&behavior.name, &input.name, behavior.preconditions.len());

        let mut recorder = self
            .config
            .record_trace
            .then(|| TraceRecorder::new(&domain.name, &behavior.name));

        // Preconditions read the seeded state
        let phase = Instant::now();
        let preconditions = if self.config.check_preconditions {
            let ctx = EvaluationContext::new(domain, &store, &input.values).with_now(now);
            check_preconditions(behavior, &ctx)
        } else {
            Vec::new()
        };
        let precondition_ms = elapsed_ms(phase);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let snapshot = store.snapshot();
        if let Some(r) = recorder.as_mut() {
            r.record_call(&input.values, &snapshot);
        }

        let phase = Instant::now();
        let call = implementation.execute(behavior, &input.values, &mut store);
        let mut execution = match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_elapsed) => {
                telemetry::emit_trial_timeout(&behavior.name, self.config.timeout_ms);
                ExecutionResult::timed_out(self.config.timeout_ms)
            }
        };
        let execution_ms = elapsed_ms(phase);
        if execution.duration_ms <= 0.0 {
            execution.duration_ms = execution_ms;
        }
        let outcome = classify_outcome(&execution);
        telemetry::emit_trial_executed(outcome.as_str(), execution_ms);

        if let Some(r) = recorder.as_mut() {
            match &execution.error {
                Some(e) => r.record_error(&e.code, &e.message, e.retriable),
                None => r.record_return(execution.result.as_ref(), execution.duration_ms, &store.snapshot()),
            }
            r.record_state_changes(store.diff(&snapshot));
        }

        // Postconditions and invariants see the post-execution state
        let error_value = execution.error.as_ref().map(ExecutionError::to_value);
        let mut ctx = EvaluationContext::new(domain, &store, &input.values)
            .with_snapshot(&snapshot)
            .with_now(now);
        if let Some(result) = execution.result.as_ref() {
            ctx = ctx.with_result(result);
        }
        if let Some(error) = error_value.as_ref() {
            ctx = ctx.with_error(error);
        }

        let phase = Instant::now();
        let postconditions = if self.config.check_postconditions {
            check_postconditions(behavior, &ctx, &outcome)
        } else {
            Vec::new()
        };
        let postcondition_ms = elapsed_ms(phase);

        let phase = Instant::now();
        let invariants = if self.config.check_invariants {
            check_all_invariants(behavior, &ctx)
        } else {
            Vec::new()
        };
        let invariant_ms = elapsed_ms(phase);

        let declared = DeclaredClauses {
            preconditions: behavior.preconditions.len(),
            postconditions: behavior.postcondition_count(),
            invariants: instantiated_invariant_count(behavior, &ctx),
        };
        drop(ctx);
        let scoring = Scoring::aggregate(
            &preconditions,
            &postconditions,
            &invariants,
            declared,
            &self.config.policy,
        );

        let trace = recorder.map(|mut r| {
            r.record_checks(&preconditions);
            r.record_checks(&postconditions);
            r.record_checks(&invariants);
            r.finish(scoring.success)
        });

        let timing = TimingInfo {
            total_ms: elapsed_ms(started),
            precondition_ms,
            execution_ms,
            postcondition_ms,
            invariant_ms,
        };
        let failed = scoring.coverage.checked() - scoring.coverage.passed();
        telemetry::emit_trial_finished(scoring.verdict, scoring.score, failed, timing.total_ms);

        Ok(VerifyResult {
            trial_id,
            success: scoring.success,
            verdict: scoring.verdict,
            score: scoring.score,
            behavior: behavior.name.clone(),
            input,
            preconditions,
            postconditions,
            invariants,
            execution,
            outcome,
            coverage: scoring.coverage,
            timing,
            spec_fingerprint: self.fingerprint.clone(),
            trace,
        })
    }

    /// Run one trial per input, at most `max_concurrency` at a time
    ///
    /// The implementation's `setup` runs once; every trial then starts
    /// from its own copy of that seeded state. Trials cancelled before
    /// their implementation call are left out of the returned results.
    /// A `max_concurrency` of 0 (only reachable through [`new`](Self::new))
    /// runs trials one at a time.
    pub async fn verify_inputs(
        &self,
        behavior: &str,
        implementation: &dyn Implementation,
        inputs: Vec<GeneratedInput>,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerifyResult>> {
        self.behavior(behavior)?;
        let seed = self.seed_store(implementation)?.snapshot();
        let trials = inputs.len();

        let outcomes: Vec<Result<VerifyResult>> = stream::iter(inputs)
            .map(|input| {
                let mut store = EntityStore::new();
                store.restore(&seed);
                self.run_trial(behavior, implementation, input, store, cancel)
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::with_capacity(trials);
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(Error::Cancelled) => continue,
                Err(e) => return Err(e),
            }
        }

        let verified = results
            .iter()
            .filter(|r| r.verdict == Verdict::Verified)
            .count();
        let mean_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| f64::from(r.score)).sum::<f64>() / results.len() as f64
        };
        telemetry::emit_batch_finished(behavior, results.len(), verified, mean_score);

        Ok(results)
    }

    /// Verify `behavior` against every input the provider generates
    pub async fn verify(
        &self,
        behavior: &str,
        implementation: &dyn Implementation,
        provider: &dyn InputProvider,
    ) -> Result<Vec<VerifyResult>> {
        let inputs = provider.generate(self.behavior(behavior)?);
        self.verify_inputs(behavior, implementation, inputs, &CancellationToken::new())
            .await
    }

    /// Mutation-harness entry point: the lowest-scoring trial wins
    ///
    /// With no inputs a single trial runs with an empty input object.
    pub async fn verify_for_mutation(
        &self,
        behavior: &str,
        implementation: &dyn Implementation,
        inputs: Vec<GeneratedInput>,
    ) -> Result<MutationVerifyResult> {
        let inputs = if inputs.is_empty() {
            vec![GeneratedInput::valid(
                "default",
                Value::Object(Default::default()),
            )]
        } else {
            inputs
        };
        let results = self
            .verify_inputs(behavior, implementation, inputs, &CancellationToken::new())
            .await?;
        results
            .into_iter()
            .min_by_key(|r| r.score)
            .map(MutationVerifyResult::from)
            .ok_or(Error::Cancelled)
    }
}
