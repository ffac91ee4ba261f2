//! Verdict and scoring - turns clause results into a score and a verdict
//!
//! # Rules
//!
//! - `score = round(100 * passed / total)` over clauses evaluated this trial
//! - `verified` iff every evaluated clause passed
//! - otherwise `risky` when `score >= policy.risky_threshold`, else `unsafe`
//! - a trial with no evaluated clauses scores 100 and takes
//!   `policy.vacuous_verdict`
//!
//! Clauses that were declared but not evaluated (inactive postcondition
//! blocks, disabled categories) show up in coverage `total` only. They
//! never count as failures.

use serde::{Deserialize, Serialize};

use crate::checker::CheckResult;

/// Default boundary between `risky` and `unsafe`
pub const DEFAULT_RISKY_THRESHOLD: u8 = 70;

// ── Verdict ───────────────────────────────────────────────

/// Three-valued correctness classification of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Verified,
    Risky,
    Unsafe,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Verified => "verified",
            Verdict::Risky => "risky",
            Verdict::Unsafe => "unsafe",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "verified" => Ok(Verdict::Verified),
            "risky" => Ok(Verdict::Risky),
            "unsafe" => Ok(Verdict::Unsafe),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// Scoring policy knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictPolicy {
    /// Minimum score (0-100) for a partially failing trial to be `risky`
    pub risky_threshold: u8,
    /// Verdict for a trial that evaluated no clauses
    pub vacuous_verdict: Verdict,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        VerdictPolicy {
            risky_threshold: DEFAULT_RISKY_THRESHOLD,
            vacuous_verdict: Verdict::Verified,
        }
    }
}

impl VerdictPolicy {
    /// Classify a trial from its pass count
    pub fn classify(&self, passed: usize, total: usize) -> Verdict {
        if total == 0 {
            return self.vacuous_verdict;
        }
        if passed >= total {
            return Verdict::Verified;
        }
        if compute_score(passed, total) >= self.risky_threshold {
            Verdict::Risky
        } else {
            Verdict::Unsafe
        }
    }
}

/// `round(100 * passed / total)`, rounding halves up; 100 when `total == 0`
pub fn compute_score(passed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let passed = passed.min(total) as u64;
    let total = total as u64;
    ((200 * passed + total) / (2 * total)) as u8
}

// ── Coverage ──────────────────────────────────────────────

/// Declared / evaluated / passed counts for one clause category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCoverage {
    pub total: usize,
    pub checked: usize,
    pub passed: usize,
}

impl CategoryCoverage {
    pub fn from_results(total: usize, results: &[CheckResult]) -> Self {
        CategoryCoverage {
            total,
            checked: results.len(),
            passed: results.iter().filter(|r| r.passed).count(),
        }
    }

    pub fn failed(&self) -> usize {
        self.checked - self.passed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub preconditions: CategoryCoverage,
    pub postconditions: CategoryCoverage,
    pub invariants: CategoryCoverage,
}

impl Coverage {
    pub fn checked(&self) -> usize {
        self.preconditions.checked + self.postconditions.checked + self.invariants.checked
    }

    pub fn passed(&self) -> usize {
        self.preconditions.passed + self.postconditions.passed + self.invariants.passed
    }

    pub fn declared(&self) -> usize {
        self.preconditions.total + self.postconditions.total + self.invariants.total
    }
}

/// Declared clause counts per category for one trial
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclaredClauses {
    pub preconditions: usize,
    pub postconditions: usize,
    pub invariants: usize,
}

// ── Aggregation ───────────────────────────────────────────

/// Aggregate score, verdict and coverage of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub success: bool,
    pub verdict: Verdict,
    pub score: u8,
    pub coverage: Coverage,
}

impl Scoring {
    pub fn aggregate(
        preconditions: &[CheckResult],
        postconditions: &[CheckResult],
        invariants: &[CheckResult],
        declared: DeclaredClauses,
        policy: &VerdictPolicy,
    ) -> Self {
        let coverage = Coverage {
            preconditions: CategoryCoverage::from_results(declared.preconditions, preconditions),
            postconditions: CategoryCoverage::from_results(declared.postconditions, postconditions),
            invariants: CategoryCoverage::from_results(declared.invariants, invariants),
        };

        let checked = coverage.checked();
        let passed = coverage.passed();
        let verdict = policy.classify(passed, checked);

        Scoring {
            success: verdict == Verdict::Verified,
            verdict,
            score: compute_score(passed, checked),
            coverage,
        }
    }
}
