//! Declarative pass/fail criteria evaluated against computed metrics.
//!
//! Thresholds are pure: evaluation reads a [`Metrics`] value and produces a
//! [`ThresholdResults`] without touching clocks or I/O, so verdicts can be
//! exercised with synthetic inputs and compared by value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::{DurationMetrics, Metrics};
use crate::util;

/// Pass/fail criteria for a test run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_duration: Option<DurationThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_failed: Option<FailureThresholds>,
}

/// Latency bounds; a zero duration leaves that bound unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurationThresholds {
    #[serde(default, with = "util::serde_duration")]
    pub avg: Duration,
    #[serde(default, with = "util::serde_duration")]
    pub p50: Duration,
    #[serde(default, with = "util::serde_duration")]
    pub p90: Duration,
    #[serde(default, with = "util::serde_duration")]
    pub p95: Duration,
    #[serde(default, with = "util::serde_duration")]
    pub p99: Duration,
}

/// Failure-rate bound as a percentage string, e.g. `"1%"` or `"0.5%"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureThresholds {
    #[serde(default)]
    pub rate: String,
}

/// The outcome of a single threshold check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub name: String,
    pub passed: bool,
    pub threshold: String,
    pub actual: String,
}

/// All threshold check outcomes for a run.
///
/// `passed` is the AND over every recorded result; with no results the
/// aggregate passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResults {
    pub passed: bool,
    pub results: Vec<ThresholdResult>,
}

impl ThresholdResults {
    /// Only the failed checks.
    pub fn violations(&self) -> Vec<&ThresholdResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }
}

impl Thresholds {
    /// Evaluate every configured bound against `metrics`.
    ///
    /// A bound passes when the actual value is strictly less than the
    /// threshold. Unset bounds and malformed percentage strings contribute
    /// no check.
    pub fn check(&self, metrics: &Metrics) -> ThresholdResults {
        let mut results = ThresholdResults {
            passed: true,
            results: Vec::new(),
        };

        if let Some(durations) = &self.http_req_duration {
            check_durations(&mut results, durations, &metrics.duration);
        }

        if let Some(failed) = &self.http_req_failed {
            if !failed.rate.is_empty() {
                check_failure_rate(&mut results, failed, metrics);
            }
        }

        results
    }
}

fn check_durations(
    results: &mut ThresholdResults,
    thresholds: &DurationThresholds,
    actual: &DurationMetrics,
) {
    let checks = [
        ("http_req_duration.avg", thresholds.avg, actual.avg),
        ("http_req_duration.p50", thresholds.p50, actual.p50),
        ("http_req_duration.p90", thresholds.p90, actual.p90),
        ("http_req_duration.p95", thresholds.p95, actual.p95),
        ("http_req_duration.p99", thresholds.p99, actual.p99),
    ];

    for (name, threshold, actual) in checks {
        if threshold.is_zero() {
            continue;
        }
        let passed = actual < threshold;
        if !passed {
            results.passed = false;
        }
        results.results.push(ThresholdResult {
            name: name.to_string(),
            passed,
            threshold: util::format_duration(threshold),
            actual: util::format_duration(actual),
        });
    }
}

fn check_failure_rate(results: &mut ThresholdResults, thresholds: &FailureThresholds, metrics: &Metrics) {
    let threshold_rate = match parse_percentage(&thresholds.rate) {
        Ok(rate) => rate,
        // Malformed percentages skip the check rather than failing the run.
        Err(_) => return,
    };

    let actual_rate = 100.0 - metrics.success_rate;
    let passed = actual_rate < threshold_rate;
    if !passed {
        results.passed = false;
    }

    results.results.push(ThresholdResult {
        name: "http_req_failed.rate".to_string(),
        passed,
        threshold: thresholds.rate.clone(),
        actual: format!("{:.2}%", actual_rate),
    });
}

fn parse_percentage(s: &str) -> Result<f64, String> {
    let trimmed = s.trim();
    let without_suffix = trimmed
        .strip_suffix('%')
        .ok_or_else(|| format!("invalid percentage format: {}", s))?;
    without_suffix
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid percentage '{}': {}", s, e))
}
