//! Rendered output shape for both formats.

use httpmock::Method::GET;
use httpmock::MockServer;

use stampede::config::OutputFormat;
use stampede::thresholds::{FailureThresholds, Thresholds};
use stampede::LoadTest;

mod common;

async fn run_small_test(server: &MockServer, thresholds: Option<Thresholds>) -> stampede::TestSummary {
    let mut configuration = common::build_configuration();
    configuration.actors = 1;
    configuration.max_iterations = 3;
    configuration.duration = "30s".to_string();
    let mut config = common::test_config(vec![common::step("ok", "GET", &server.url("/ok"))]);
    config.thresholds = thresholds;
    let load_test = LoadTest::with_config(configuration, config).unwrap();
    load_test.execute().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn json_output_matches_schema() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/ok");
        then.status(200).body("fine");
    });

    let summary = run_small_test(
        &server,
        Some(Thresholds {
            http_req_duration: None,
            http_req_failed: Some(FailureThresholds {
                rate: "1%".to_string(),
            }),
        }),
    )
    .await;

    let mut buffer = Vec::new();
    summary.write(&mut buffer, OutputFormat::Json).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

    assert_eq!(parsed["totalRequests"], 3);
    assert_eq!(parsed["successCount"], 3);
    assert_eq!(parsed["failureCount"], 0);
    assert_eq!(parsed["successRate"], 100.0);
    assert!(parsed["requestsPerSec"].as_f64().unwrap() > 0.0);
    assert!(parsed["duration"].is_string());
    for key in ["min", "max", "avg", "p50", "p90", "p95", "p99"] {
        assert!(
            parsed["durations"][key].is_string(),
            "missing durations.{}",
            key
        );
    }
    assert_eq!(parsed["steps"]["ok"]["count"], 3);
    assert_eq!(parsed["steps"]["ok"]["success"], 3);
    assert_eq!(parsed["steps"]["ok"]["failed"], 0);
    assert_eq!(parsed["steps"]["ok"]["successRate"], 100.0);
    assert_eq!(parsed["thresholds"]["passed"], true);
    let results = parsed["thresholds"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], "http_req_failed.rate");
    assert_eq!(results[0]["passed"], true);
    assert_eq!(results[0]["threshold"], "1%");
    assert_eq!(results[0]["actual"], "0.00%");
}

#[tokio::test(flavor = "multi_thread")]
async fn text_output_is_readable() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/ok");
        then.status(200);
    });

    let summary = run_small_test(&server, None).await;

    let mut buffer = Vec::new();
    summary.write(&mut buffer, OutputFormat::Text).unwrap();
    let output = String::from_utf8(buffer).unwrap();

    assert!(output.contains("Stampede - Load Test Results"));
    assert!(output.contains("Total Requests: 3"));
    assert!(output.contains("Success Rate:   100.0%"));
    assert!(output.contains("Response Times:"));
    assert!(output.contains("By Step:"));
    assert!(output.contains("ok"));
    assert!(!output.contains("Thresholds:"));
}
