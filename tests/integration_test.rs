//! Full stream lifecycle against in-memory collaborators

mod common;

use common::TestStream;
use reporter_stream::health::{HealthEvent, HealthStatus};
use reporter_stream::output::OutputStream;
use reporter_stream::recovery::fallback;
use reporter_stream::testing::MockEnvironment;
use reporter_stream::TestResult;
use serde_json::Value;
use tokio_test::assert_ok;

fn records(lines: &[String]) -> Vec<Value> {
    lines
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_structured_run_from_start_to_summary() {
    let harness = TestStream::interactive();
    let stream = &harness.stream;
    stream.start();

    assert_ok!(stream.stream_suite_start("math", Some("math.test.ts")).await);
    assert_ok!(
        stream
            .stream_test_result(&TestResult::failed("math.test.ts", "divides", 3, "boom"))
            .await
    );
    assert_ok!(
        stream
            .stream_test_result(&TestResult::passed("math.test.ts", "adds", 1))
            .await
    );
    assert_ok!(
        stream
            .stream_console_output("log line", OutputStream::Stdout)
            .await
    );
    assert_ok!(stream.stream_suite_end("math", Some("math.test.ts"), 4).await);

    let summary = assert_ok!(stream.stop().await);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.degraded);

    let records = records(&harness.writer.lines(OutputStream::Stdout));
    let types: Vec<&str> = records
        .iter()
        .map(|r| r["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec!["suite_start", "test", "test", "console", "suite_end", "summary"]
    );
    assert_eq!(records[1]["status"], "failed");
    assert_eq!(records[1]["error"], "boom");

    let report = stream.diagnostics_report().await;
    assert_eq!(report.total_operations, 5);
    assert_eq!(report.failed_operations, 0);
}

#[tokio::test]
async fn test_ci_environment_streams_plain_lines() {
    let harness = TestStream::new(
        MockEnvironment::interactive().with_var("GITHUB_ACTIONS", "true"),
        |_| {},
    );
    let stream = &harness.stream;
    stream.start();

    assert!(stream.is_degraded());
    assert_eq!(
        stream.environment().unwrap().ci_provider.as_deref(),
        Some("github_actions")
    );

    assert_ok!(
        stream
            .stream_test_result(&TestResult::skipped("a.test.ts", "later"))
            .await
    );
    assert_ok!(stream.stop().await);

    let lines = harness.writer.lines(OutputStream::Stdout);
    assert_eq!(lines[0], "SKIP a.test.ts > later");
    assert!(lines[1].starts_with("Tests: 1 total, 0 passed, 0 failed, 1 skipped"));
}

#[tokio::test]
async fn test_broken_output_lands_in_fallback_file() {
    let harness = TestStream::interactive();
    let stream = &harness.stream;
    stream.start();
    harness.writer.set_failing(true);

    // Both the structured write and the plain fallback fail; the record
    // still reaches the fallback file and the caller sees no error.
    assert_ok!(
        stream
            .stream_test_result(&TestResult::failed("io.test.ts", "reads", 2, "nope"))
            .await
    );

    let saved = assert_ok!(fallback::read_records(&harness.fallback_file()).await);
    assert_eq!(saved.len(), 1);
    assert!(saved[0].error.message.contains("broken pipe"));

    let stats = stream.stats();
    assert_eq!(stats.counters.fallbacks, 1);
    assert_eq!(stats.counters.degraded_writes, 0);

    harness.writer.set_failing(false);
    assert_ok!(stream.stop().await);
}

#[tokio::test]
async fn test_memory_pressure_fails_health_until_it_subsides() {
    let harness = TestStream::interactive();
    let stream = &harness.stream;
    let mut events = stream.subscribe_health();
    let monitor = stream.health_monitor();

    harness.probe.set_memory_mb(2048);
    assert_eq!(monitor.perform_health_check().await, HealthStatus::Failed);
    assert_eq!(
        events.recv().await.unwrap(),
        HealthEvent::HealthChanged {
            from: HealthStatus::Healthy,
            to: HealthStatus::Failed,
        }
    );
    assert_eq!(stream.health().await.circuit_breaker.failure_count, 1);

    harness.probe.set_memory_mb(64);
    assert_eq!(monitor.perform_health_check().await, HealthStatus::Healthy);
    assert_eq!(
        events.recv().await.unwrap(),
        HealthEvent::HealthChanged {
            from: HealthStatus::Failed,
            to: HealthStatus::Healthy,
        }
    );

    let data = stream.health().await;
    assert_eq!(data.consecutive_successes, 1);
    // Only closing or resetting the breaker clears its count.
    assert_eq!(data.circuit_breaker.failure_count, 1);
    assert!(!data.circuit_breaker.is_open);
}
