//! Verification configuration
//!
//! Loaded from JSON (file or string) with every field optional, then
//! optionally overridden from `ISL_VERIFY_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::verdict::VerdictPolicy;
use crate::{Error, Result};

mod defaults {
    pub fn timeout_ms() -> u64 {
        30_000
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn max_concurrency() -> usize {
        8
    }
}

/// Engine configuration shared by every trial of a [`VerificationEngine`](crate::VerificationEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default)]
    pub policy: VerdictPolicy,

    /// Timeout for the single call into the implementation
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    // Category toggles
    #[serde(default = "defaults::enabled")]
    pub check_preconditions: bool,
    #[serde(default = "defaults::enabled")]
    pub check_postconditions: bool,
    #[serde(default = "defaults::enabled")]
    pub check_invariants: bool,

    /// Attach a call/return/check trace to every result
    #[serde(default)]
    pub record_trace: bool,

    /// Upper bound on concurrently running trials in a batch
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            policy: VerdictPolicy::default(),
            timeout_ms: defaults::timeout_ms(),
            check_preconditions: true,
            check_postconditions: true,
            check_invariants: true,
            record_trace: false,
            max_concurrency: defaults::max_concurrency(),
        }
    }
}

impl VerifyConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: VerifyConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Apply `ISL_VERIFY_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognised keys: `ISL_VERIFY_TIMEOUT_MS`, `ISL_VERIFY_RISKY_THRESHOLD`,
    /// `ISL_VERIFY_MAX_CONCURRENCY`, `ISL_VERIFY_RECORD_TRACE`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ISL_VERIFY_TIMEOUT_MS") {
            self.timeout_ms = parse_override("ISL_VERIFY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ISL_VERIFY_RISKY_THRESHOLD") {
            self.policy.risky_threshold = parse_override("ISL_VERIFY_RISKY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ISL_VERIFY_MAX_CONCURRENCY") {
            self.max_concurrency = parse_override("ISL_VERIFY_MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("ISL_VERIFY_RECORD_TRACE") {
            self.record_trace = parse_override("ISL_VERIFY_RECORD_TRACE", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy.risky_threshold > 100 {
            return Err(Error::Config(format!(
                "risky_threshold must be within 0..=100, got {}",
                self.policy.risky_threshold
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be greater than 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: cannot parse '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Verdict;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VerifyConfig::default();
        assert_eq!(config.policy.risky_threshold, 70);
        assert_eq!(config.policy.vacuous_verdict, Verdict::Verified);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.check_preconditions && config.check_postconditions && config.check_invariants);
        assert!(!config.record_trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config =
            VerifyConfig::from_json_str(r#"{"timeout_ms": 500, "check_invariants": false}"#).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert!(!config.check_invariants);
        assert!(config.check_preconditions);
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = VerifyConfig::from_json_str(r#"{"policy": {"risky_threshold": 101}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(VerifyConfig::from_json_str(r#"{"timeout_ms": 0}"#).is_err());
        assert!(VerifyConfig::from_json_str(r#"{"max_concurrency": 0}"#).is_err());
        assert!(VerifyConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"record_trace": true, "policy": {{"vacuous_verdict": "risky"}}}}"#).unwrap();
        let config = VerifyConfig::load(file.path()).unwrap();
        assert!(config.record_trace);
        assert_eq!(config.policy.vacuous_verdict, Verdict::Risky);
        assert_eq!(config.policy.risky_threshold, 70);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = VerifyConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let config = VerifyConfig::default()
            .with_overrides(|key| match key {
                "ISL_VERIFY_TIMEOUT_MS" => Some("250".to_string()),
                "ISL_VERIFY_RECORD_TRACE" => Some("true".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert!(config.record_trace);

        let err = VerifyConfig::default()
            .with_overrides(|key| (key == "ISL_VERIFY_MAX_CONCURRENCY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ISL_VERIFY_MAX_CONCURRENCY"));
    }
}
