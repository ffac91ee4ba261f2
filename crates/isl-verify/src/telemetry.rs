//! Tracing setup and structured trial lifecycle events
//!
//! Call [`init_tracing`] once at program start. Every trial runs inside a
//! [`TrialSpan`] so its events carry `trial_id`, `behavior` and `input`.
//!
//! Events:
//! - `trial.started`, `trial.executed`, `trial.finished` (info)
//! - `trial.timeout` (warn)
//! - `clause.failed` (debug, emitted by the checkers)
//! - `batch.finished` (info)

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::verdict::Verdict;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Only the first call in a
/// process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Span scoping every event of one verification trial
///
/// Trials are async, so the span is attached with [`TrialSpan::instrument`]
/// rather than held entered across an await point.
#[derive(Debug, Clone)]
pub struct TrialSpan {
    span: tracing::Span,
}

impl TrialSpan {
    pub fn new(trial_id: &str, behavior: &str, input: &str) -> Self {
        let span = tracing::info_span!(
            "isl.trial",
            trial_id = %trial_id,
            behavior = %behavior,
            input = %input,
        );
        TrialSpan { span }
    }

    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        tracing::Instrument::instrument(future, self.span.clone())
    }

    /// Enter the span for synchronous work
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

pub fn emit_trial_started(behavior: &str, input: &str, preconditions: usize) {
    info!(
        event = "trial.started",
        behavior = %behavior,
        input = %input,
        preconditions = preconditions,
    );
}

pub fn emit_trial_executed(outcome: &str, duration_ms: f64) {
    info!(event = "trial.executed", outcome = %outcome, duration_ms = duration_ms);
}

pub fn emit_trial_timeout(behavior: &str, timeout_ms: u64) {
    tracing::warn!(event = "trial.timeout", behavior = %behavior, timeout_ms = timeout_ms);
}

pub fn emit_trial_finished(verdict: Verdict, score: u8, failed: usize, total_ms: f64) {
    info!(
        event = "trial.finished",
        verdict = %verdict,
        score = score,
        failed = failed,
        total_ms = total_ms,
    );
}

pub fn emit_batch_finished(behavior: &str, trials: usize, verified: usize, mean_score: f64) {
    info!(
        event = "batch.finished",
        behavior = %behavior,
        trials = trials,
        verified = verified,
        mean_score = mean_score,
    );
}
