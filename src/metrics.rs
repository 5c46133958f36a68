//! Metrics computed from collected events, and their rendering.
//!
//! [`compute_metrics`] is a pure function from an event slice and a test
//! duration to a [`Metrics`] value: identical inputs produce structurally
//! equal outputs and the input is never mutated. Rendering to text or JSON
//! is layered on top and never feeds back into computation.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;

use crate::event::Event;
use crate::thresholds::ThresholdResults;
use crate::util::{format_duration, format_number};

/// Aggregated results for a test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_requests: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Percentage of successful requests, 0 when no requests were made.
    pub success_rate: f64,
    pub requests_per_sec: f64,
    pub test_duration: Duration,
    /// Latency statistics across every step.
    pub duration: DurationMetrics,
    /// Per-step breakdown, ordered by step name.
    pub steps: BTreeMap<String, StepMetrics>,
}

/// Latency statistics over a duration multiset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationMetrics {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Per-step counters and latency statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepMetrics {
    pub count: usize,
    pub success: usize,
    pub failed: usize,
    pub duration: DurationMetrics,
}

/// Compute metrics from events. Pure; the input slice is left untouched.
pub fn compute_metrics(events: &[Event], test_duration: Duration) -> Metrics {
    let mut metrics = Metrics {
        total_requests: 0,
        success_count: 0,
        failure_count: 0,
        success_rate: 0.0,
        requests_per_sec: 0.0,
        test_duration,
        duration: DurationMetrics::default(),
        steps: BTreeMap::new(),
    };

    if events.is_empty() {
        return metrics;
    }

    let mut all_durations = Vec::with_capacity(events.len());
    let mut step_durations: BTreeMap<&str, Vec<Duration>> = BTreeMap::new();

    for event in events {
        metrics.total_requests += 1;
        if event.success {
            metrics.success_count += 1;
        } else {
            metrics.failure_count += 1;
        }
        all_durations.push(event.duration);

        let step = metrics.steps.entry(event.step.clone()).or_default();
        step.count += 1;
        if event.success {
            step.success += 1;
        } else {
            step.failed += 1;
        }
        step_durations
            .entry(event.step.as_str())
            .or_default()
            .push(event.duration);
    }

    metrics.success_rate = metrics.success_count as f64 / metrics.total_requests as f64 * 100.0;
    if !test_duration.is_zero() {
        metrics.requests_per_sec = metrics.total_requests as f64 / test_duration.as_secs_f64();
    }

    metrics.duration = compute_duration_metrics(&all_durations);
    for (step, durations) in step_durations {
        if let Some(step_metrics) = metrics.steps.get_mut(step) {
            step_metrics.duration = compute_duration_metrics(&durations);
        }
    }

    metrics
}

/// Latency statistics for one duration multiset; all zero when empty.
pub fn compute_duration_metrics(durations: &[Duration]) -> DurationMetrics {
    if durations.is_empty() {
        return DurationMetrics::default();
    }

    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    let total: Duration = sorted.iter().sum();

    DurationMetrics {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        avg: total / sorted.len() as u32,
        p50: percentile(&sorted, 0.50),
        p90: percentile(&sorted, 0.90),
        p95: percentile(&sorted, 0.95),
        p99: percentile(&sorted, 0.99),
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
///
/// `p` is in `[0, 1]`; values at or past the ends clamp to the first and
/// last elements.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let index = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[index]
}

/// Write metrics in human-readable form.
pub fn write_text(
    w: &mut dyn Write,
    metrics: &Metrics,
    thresholds: Option<&ThresholdResults>,
    dropped_events: usize,
) -> io::Result<()> {
    if metrics.total_requests == 0 {
        writeln!(w, "No events collected")?;
        return Ok(());
    }

    writeln!(w)?;
    writeln!(w, "Stampede - Load Test Results")?;
    writeln!(w, "============================")?;
    writeln!(w)?;
    writeln!(w, "Duration:       {}", format_duration(metrics.test_duration))?;
    writeln!(w, "Total Requests: {}", format_number(metrics.total_requests))?;
    writeln!(
        w,
        "Success Rate:   {:.1}% ({} / {})",
        metrics.success_rate,
        format_number(metrics.success_count),
        format_number(metrics.total_requests)
    )?;
    writeln!(w, "Requests/sec:   {:.1}", metrics.requests_per_sec)?;
    if dropped_events > 0 {
        writeln!(
            w,
            "Dropped events: {} (metrics queue saturated)",
            format_number(dropped_events)
        )?;
    }
    writeln!(w)?;
    writeln!(w, "Response Times:")?;
    writeln!(w, "  Min:    {}", format_duration(metrics.duration.min))?;
    writeln!(w, "  Avg:    {}", format_duration(metrics.duration.avg))?;
    writeln!(w, "  P50:    {}", format_duration(metrics.duration.p50))?;
    writeln!(w, "  P90:    {}", format_duration(metrics.duration.p90))?;
    writeln!(w, "  P95:    {}", format_duration(metrics.duration.p95))?;
    writeln!(w, "  P99:    {}", format_duration(metrics.duration.p99))?;
    writeln!(w, "  Max:    {}", format_duration(metrics.duration.max))?;
    writeln!(w)?;
    writeln!(w, "By Step:")?;
    for (step, step_metrics) in &metrics.steps {
        writeln!(
            w,
            "  {:<15} {} reqs   avg={}  p95={}  p99={}",
            step,
            format_number(step_metrics.count),
            format_duration(step_metrics.duration.avg),
            format_duration(step_metrics.duration.p95),
            format_duration(step_metrics.duration.p99)
        )?;
    }

    if let Some(thresholds) = thresholds {
        if !thresholds.results.is_empty() {
            writeln!(w)?;
            writeln!(w, "Thresholds:")?;
            for result in &thresholds.results {
                let symbol = if result.passed { "✓" } else { "✗" };
                writeln!(
                    w,
                    "  {} {} < {} (actual: {})",
                    symbol, result.name, result.threshold, result.actual
                )?;
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDurationMetrics {
    min: String,
    max: String,
    avg: String,
    p50: String,
    p90: String,
    p95: String,
    p99: String,
}

impl From<&DurationMetrics> for JsonDurationMetrics {
    fn from(d: &DurationMetrics) -> JsonDurationMetrics {
        JsonDurationMetrics {
            min: format_duration(d.min),
            max: format_duration(d.max),
            avg: format_duration(d.avg),
            p50: format_duration(d.p50),
            p90: format_duration(d.p90),
            p95: format_duration(d.p95),
            p99: format_duration(d.p99),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonStepMetrics {
    count: usize,
    success: usize,
    failed: usize,
    success_rate: f64,
    durations: JsonDurationMetrics,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    duration: String,
    total_requests: usize,
    success_count: usize,
    failure_count: usize,
    success_rate: f64,
    requests_per_sec: f64,
    dropped_events: usize,
    durations: JsonDurationMetrics,
    steps: BTreeMap<&'a str, JsonStepMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thresholds: Option<&'a ThresholdResults>,
}

/// Write metrics as pretty-printed JSON.
pub fn write_json(
    w: &mut dyn Write,
    metrics: &Metrics,
    thresholds: Option<&ThresholdResults>,
    dropped_events: usize,
) -> io::Result<()> {
    let report = JsonReport {
        duration: format_duration(metrics.test_duration),
        total_requests: metrics.total_requests,
        success_count: metrics.success_count,
        failure_count: metrics.failure_count,
        success_rate: metrics.success_rate,
        requests_per_sec: metrics.requests_per_sec,
        dropped_events,
        durations: JsonDurationMetrics::from(&metrics.duration),
        steps: metrics
            .steps
            .iter()
            .map(|(name, step)| {
                (
                    name.as_str(),
                    JsonStepMetrics {
                        count: step.count,
                        success: step.success,
                        failed: step.failed,
                        success_rate: if step.count > 0 {
                            step.success as f64 / step.count as f64 * 100.0
                        } else {
                            0.0
                        },
                        durations: JsonDurationMetrics::from(&step.duration),
                    },
                )
            })
            .collect(),
        thresholds,
    };

    serde_json::to_writer_pretty(&mut *w, &report)?;
    writeln!(w)
}

#[cfg(test)]
pub(crate) mod test_events {
    use super::*;
    use chrono::Utc;

    pub(crate) fn successful_event(step: &str, duration: Duration) -> Event {
        Event {
            actor_id: 1,
            timestamp: Utc::now(),
            step: step.to_string(),
            protocol: "http".to_string(),
            duration,
            success: true,
            error: String::new(),
            status_code: 200,
            bytes_sent: 0,
            bytes_received: 64,
        }
    }

    pub(crate) fn failed_event(step: &str, duration: Duration) -> Event {
        Event {
            actor_id: 1,
            timestamp: Utc::now(),
            step: step.to_string(),
            protocol: "http".to_string(),
            duration,
            success: false,
            error: "500 Internal Server Error".to_string(),
            status_code: 500,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_events::{failed_event, successful_event};
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn empty_events_are_all_zero() {
        let metrics = compute_metrics(&[], Duration::from_secs(1));
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.requests_per_sec, 0.0);
        assert_eq!(metrics.duration, DurationMetrics::default());
        assert!(metrics.steps.is_empty());
    }

    #[test]
    fn aggregates_counts_and_steps() {
        let events = vec![
            successful_event("login", ms(100)),
            successful_event("login", ms(200)),
            failed_event("cart", ms(300)),
            successful_event("cart", ms(100)),
        ];
        let metrics = compute_metrics(&events, Duration::from_secs(2));
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.success_count, 3);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.success_rate, 75.0);
        assert_eq!(metrics.requests_per_sec, 2.0);
        assert_eq!(metrics.steps.len(), 2);
        assert_eq!(metrics.steps["login"].count, 2);
        assert_eq!(metrics.steps["login"].failed, 0);
        assert_eq!(metrics.steps["cart"].count, 2);
        assert_eq!(metrics.steps["cart"].failed, 1);
        assert_eq!(metrics.steps["cart"].duration.max, ms(300));
    }

    #[test]
    fn zero_duration_yields_zero_rps() {
        let events = vec![successful_event("a", ms(10))];
        let metrics = compute_metrics(&events, Duration::ZERO);
        assert_eq!(metrics.requests_per_sec, 0.0);
    }

    #[test]
    fn nearest_rank_percentiles() {
        let sorted: Vec<Duration> = vec![ms(10), ms(20), ms(30), ms(40)];
        // index = floor((n-1) * p)
        assert_eq!(percentile(&sorted, 0.50), ms(20));
        assert_eq!(percentile(&sorted, 0.90), ms(30));
        assert_eq!(percentile(&sorted, 0.99), ms(30));
        assert_eq!(percentile(&sorted, 0.0), ms(10));
        assert_eq!(percentile(&sorted, 1.0), ms(40));
        assert_eq!(percentile(&sorted, -0.5), ms(10));
        assert_eq!(percentile(&sorted, 1.5), ms(40));
        assert_eq!(percentile(&[], 0.5), Duration::ZERO);
        assert_eq!(percentile(&[ms(7)], 0.99), ms(7));
    }

    #[test]
    fn percentiles_are_ordered() {
        let durations: Vec<Duration> = (0..137).map(|i| ms((i * 13) % 211)).collect();
        let computed = compute_duration_metrics(&durations);
        assert!(computed.min <= computed.p50);
        assert!(computed.p50 <= computed.p90);
        assert!(computed.p90 <= computed.p95);
        assert!(computed.p95 <= computed.p99);
        assert!(computed.p99 <= computed.max);
        assert!(computed.avg >= computed.min && computed.avg <= computed.max);
    }

    #[test]
    fn compute_is_pure() {
        let events = vec![
            successful_event("a", ms(100)),
            failed_event("b", ms(50)),
            successful_event("a", ms(150)),
        ];
        let snapshot: Vec<(String, Duration, bool)> = events
            .iter()
            .map(|e| (e.step.clone(), e.duration, e.success))
            .collect();
        let first = compute_metrics(&events, Duration::from_secs(1));
        let second = compute_metrics(&events, Duration::from_secs(1));
        assert_eq!(first, second);
        let after: Vec<(String, Duration, bool)> = events
            .iter()
            .map(|e| (e.step.clone(), e.duration, e.success))
            .collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn text_output_contains_summary() {
        let events = vec![
            successful_event("ok", ms(100)),
            successful_event("ok", ms(200)),
        ];
        let metrics = compute_metrics(&events, Duration::from_secs(1));
        let mut buffer = Vec::new();
        write_text(&mut buffer, &metrics, None, 0).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("Total Requests: 2"));
        assert!(output.contains("Success Rate:   100.0%"));
        assert!(output.contains("ok"));
        assert!(!output.contains("Dropped events"));

        let mut buffer = Vec::new();
        write_text(&mut buffer, &metrics, None, 3).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("Dropped events: 3"));
    }

    #[test]
    fn empty_text_output() {
        let metrics = compute_metrics(&[], Duration::ZERO);
        let mut buffer = Vec::new();
        write_text(&mut buffer, &metrics, None, 0).unwrap();
        assert!(String::from_utf8(buffer).unwrap().contains("No events collected"));
    }

    #[test]
    fn json_output_shape() {
        let events = vec![
            successful_event("login", ms(100)),
            failed_event("login", ms(300)),
        ];
        let metrics = compute_metrics(&events, Duration::from_secs(1));
        let mut buffer = Vec::new();
        write_json(&mut buffer, &metrics, None, 1).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed["totalRequests"], 2);
        assert_eq!(parsed["successCount"], 1);
        assert_eq!(parsed["failureCount"], 1);
        assert_eq!(parsed["successRate"], 50.0);
        assert_eq!(parsed["droppedEvents"], 1);
        assert_eq!(parsed["durations"]["min"], "100ms");
        assert_eq!(parsed["durations"]["max"], "300ms");
        assert_eq!(parsed["steps"]["login"]["count"], 2);
        assert_eq!(parsed["steps"]["login"]["successRate"], 50.0);
        assert!(parsed.get("thresholds").is_none());
    }
}
