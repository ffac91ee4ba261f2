//! Result reporter - text, markdown, json and compact renderings
//!
//! Pure formatting. Nothing here mutates a result or returns an error; a
//! JSON serialisation failure is rendered into the output instead.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use serde::Serialize;

use crate::checker::CheckResult;
use crate::engine::VerifyResult;
use crate::verdict::{CategoryCoverage, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
    Compact,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            "compact" => Ok(ReportFormat::Compact),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mark = if self.passed { "✓" } else { "✗" };
        write!(f, "{} {}: {}", mark, self.name, self.expression)?;
        if self.passed {
            return Ok(());
        }
        if let Some(err) = &self.error {
            write!(f, " (error: {})", err)
        } else if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {}, actual {})", expected, actual)
        } else {
            Ok(())
        }
    }
}

// ── Single Result ─────────────────────────────────────────

pub fn format_result(result: &VerifyResult, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => text(result),
        ReportFormat::Markdown => markdown(result),
        ReportFormat::Json => to_json(result),
        ReportFormat::Compact => compact(result),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        serde_json::json!({ "error": format!("failed to serialize report: {}", e) }).to_string()
    })
}

fn ratio(c: &CategoryCoverage) -> String {
    format!("{}/{}", c.passed, c.checked)
}

fn compact(result: &VerifyResult) -> String {
    let mut line = format!(
        "{}[{}] {} {} pre {} post {} inv {}",
        result.behavior,
        result.input.name,
        result.verdict,
        result.score,
        ratio(&result.coverage.preconditions),
        ratio(&result.coverage.postconditions),
        ratio(&result.coverage.invariants),
    );
    let failed: Vec<&str> = result
        .all_checks()
        .filter(|c| !c.passed)
        .map(|c| c.name.as_str())
        .collect();
    if !failed.is_empty() {
        let _ = write!(line, " failed: {}", failed.join(","));
    }
    line
}

fn text(result: &VerifyResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Verification: {} [{}]", result.behavior, result.input.name);
    let _ = writeln!(
        out,
        "Verdict: {}  Score: {}/100",
        result.verdict.as_str().to_uppercase(),
        result.score
    );
    let _ = writeln!(out, "Outcome: {}", result.outcome);
    if let Some(err) = &result.execution.error {
        let _ = writeln!(out, "Error: {} - {}", err.code, err.message);
    }

    let sections = [
        ("Preconditions", &result.preconditions, &result.coverage.preconditions),
        ("Postconditions", &result.postconditions, &result.coverage.postconditions),
        ("Invariants", &result.invariants, &result.coverage.invariants),
    ];
    for (title, checks, coverage) in sections {
        let _ = writeln!(
            out,
            "\n{} ({} passed, {} declared)",
            title,
            ratio(coverage),
            coverage.total
        );
        if checks.is_empty() {
            let _ = writeln!(out, "  (none evaluated)");
        }
        for check in checks {
            let _ = writeln!(out, "  {}", check);
        }
    }

    let _ = writeln!(
        out,
        "\nTiming: total {:.2}ms (execution {:.2}ms)",
        result.timing.total_ms, result.timing.execution_ms
    );
    out
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn markdown(result: &VerifyResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {} `{}`\n", result.behavior, result.input.name);
    let _ = writeln!(out, "- **Verdict:** {}", result.verdict);
    let _ = writeln!(out, "- **Score:** {}/100", result.score);
    let _ = writeln!(out, "- **Outcome:** `{}`\n", result.outcome);

    let _ = writeln!(out, "| Status | Clause | Expression | Detail |");
    let _ = writeln!(out, "|---|---|---|---|");
    for check in result.all_checks() {
        let status = if check.passed { "pass" } else { "FAIL" };
        let detail = match (&check.error, &check.expected, &check.actual) {
            (Some(err), _, _) => escape_cell(err),
            (None, Some(e), Some(a)) if !check.passed => {
                escape_cell(&format!("expected {}, actual {}", e, a))
            }
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "| {} | `{}` | `{}` | {} |",
            status,
            check.name,
            escape_cell(&check.expression),
            detail
        );
    }
    out
}

// ── Batches ───────────────────────────────────────────────

/// Aggregate view over many trials
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub trials: usize,
    pub verified: usize,
    pub risky: usize,
    #[serde(rename = "unsafe")]
    pub unsafe_count: usize,
    pub mean_score: f64,
    pub min_score: Option<u8>,
    /// Failing clause name -> number of trials it failed in
    pub failing_clauses: BTreeMap<String, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[VerifyResult]) -> Self {
        let mut summary = BatchSummary {
            trials: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.verdict {
                Verdict::Verified => summary.verified += 1,
                Verdict::Risky => summary.risky += 1,
                Verdict::Unsafe => summary.unsafe_count += 1,
            }
            for c in r.failed_checks() {
                *summary.failing_clauses.entry(c.name.clone()).or_insert(0) += 1;
            }
        }
        if !results.is_empty() {
            let total: f64 = results.iter().map(|r| f64::from(r.score)).sum();
            summary.mean_score = total / results.len() as f64;
            summary.min_score = results.iter().map(|r| r.score).min();
        }
        summary
    }

    pub fn all_verified(&self) -> bool {
        self.verified == self.trials
    }
}

pub fn format_batch(results: &[VerifyResult], format: ReportFormat) -> String {
    let summary = BatchSummary::from_results(results);
    match format {
        ReportFormat::Compact => format!(
            "{} trials: {} verified, {} risky, {} unsafe, mean score {:.1}",
            summary.trials, summary.verified, summary.risky, summary.unsafe_count, summary.mean_score
        ),
        ReportFormat::Json => {
            #[derive(Serialize)]
            struct Batch<'a> {
                summary: &'a BatchSummary,
                results: &'a [VerifyResult],
            }
            to_json(&Batch {
                summary: &summary,
                results,
            })
        }
        ReportFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Batch: {} trials, {} verified, {} risky, {} unsafe (mean score {:.1})",
                summary.trials, summary.verified, summary.risky, summary.unsafe_count, summary.mean_score
            );
            for r in results {
                let _ = writeln!(out, "  {}", compact(r));
            }
            if !summary.failing_clauses.is_empty() {
                let _ = writeln!(out, "Failing clauses:");
                for (name, count) in &summary.failing_clauses {
                    let _ = writeln!(out, "  {} ({}x)", name, count);
                }
            }
            out
        }
        ReportFormat::Markdown => {
            let mut out = String::new();
            let _ = writeln!(out, "## Verification batch\n");
            let _ = writeln!(out, "| Behavior | Input | Verdict | Score |");
            let _ = writeln!(out, "|---|---|---|---|");
            for r in results {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    escape_cell(&r.behavior),
                    escape_cell(&r.input.name),
                    r.verdict,
                    r.score
                );
            }
            let _ = writeln!(
                out,
                "\n**{}/{} verified**, mean score {:.1}",
                summary.verified, summary.trials, summary.mean_score
            );
            out
        }
    }
}
