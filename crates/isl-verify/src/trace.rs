//! Per-trial execution trace
//!
//! A [`TraceRecorder`] collects the call, return, error, state change and
//! clause check events of one trial. [`TraceRecorder::finish`] freezes
//! them into a [`Trace`], which the engine attaches to the
//! [`VerifyResult`](crate::VerifyResult) when `record_trace` is enabled.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checker::{CheckResult, CheckType};
use crate::store::{EntityStoreSnapshot, StoreChange};
use crate::value::Value;
use crate::Result;

/// Event payload, tagged by `type` in JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventData {
    Call {
        behavior: String,
        input: Value,
        state_before: serde_json::Value,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        duration_ms: f64,
        state_after: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
        retriable: bool,
    },
    StateChange {
        change: StoreChange,
    },
    Check {
        category: CheckType,
        name: String,
        expression: String,
        passed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actual: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(flatten)]
    pub data: TraceEventData,
}

/// Frozen trace of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub domain: String,
    pub behavior: String,
    pub start_time: i64,
    pub end_time: i64,
    pub events: Vec<TraceEvent>,
    pub passed: bool,
    /// Index into `events` of the first failed check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_index: Option<usize>,
}

impl Trace {
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Write the trace as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Mutable event collector for one trial
#[derive(Debug)]
pub struct TraceRecorder {
    id: Uuid,
    domain: String,
    behavior: String,
    start_time: i64,
    events: Vec<TraceEvent>,
}

impl TraceRecorder {
    pub fn new(domain: impl Into<String>, behavior: impl Into<String>) -> Self {
        TraceRecorder {
            id: Uuid::new_v4(),
            domain: domain.into(),
            behavior: behavior.into(),
            start_time: Utc::now().timestamp_millis(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    fn push(&mut self, data: TraceEventData) {
        let id = format!("evt_{}", self.events.len() + 1);
        self.events.push(TraceEvent {
            id,
            timestamp: Utc::now().timestamp_millis(),
            data,
        });
    }

    pub fn record_call(&mut self, input: &Value, before: &EntityStoreSnapshot) {
        let behavior = self.behavior.clone();
        self.push(TraceEventData::Call {
            behavior,
            input: input.clone(),
            state_before: before.to_json(),
        });
    }

    pub fn record_return(&mut self, result: Option<&Value>, duration_ms: f64, after: &EntityStoreSnapshot) {
        self.push(TraceEventData::Return {
            result: result.cloned(),
            duration_ms,
            state_after: after.to_json(),
        });
    }

    pub fn record_error(&mut self, code: &str, message: &str, retriable: bool) {
        self.push(TraceEventData::Error {
            code: code.to_string(),
            message: message.to_string(),
            retriable,
        });
    }

    pub fn record_state_changes(&mut self, changes: Vec<StoreChange>) {
        for change in changes {
            self.push(TraceEventData::StateChange { change });
        }
    }

    pub fn record_checks(&mut self, results: &[CheckResult]) {
        for r in results {
            self.push(TraceEventData::Check {
                category: r.check_type,
                name: r.name.clone(),
                expression: r.expression.clone(),
                passed: r.passed,
                expected: r.expected.clone(),
                actual: r.actual.clone(),
                error: r.error.clone(),
            });
        }
    }

    pub fn finish(self, passed: bool) -> Trace {
        let failure_index = self
            .events
            .iter()
            .position(|e| matches!(e.data, TraceEventData::Check { passed: false, .. }));
        Trace {
            id: self.id,
            domain: self.domain,
            behavior: self.behavior,
            start_time: self.start_time,
            end_time: Utc::now().timestamp_millis(),
            events: self.events,
            passed,
            failure_index,
        }
    }
}
