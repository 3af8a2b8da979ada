use super::*;
use crate::health::HealthStatus;
use crate::recovery::{fallback, RecoveryStrategy};
use crate::testing::{MockEnvironment, MockOutputWriter, MockSystemProbe};
use async_trait::async_trait;
use tempfile::TempDir;

/// Fails structured (JSON) lines, optionally slows every write
#[derive(Clone, Default)]
struct SelectiveWriter {
    inner: MockOutputWriter,
    fail_structured: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl OutputWriter for SelectiveWriter {
    async fn write_line(&self, stream: OutputStream, text: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_structured && text.starts_with('{') {
            return Err(StreamError::output_with_code(
                ErrorCode::OUTPUT_WRITE_FAILED,
                "write failed: broken pipe",
            ));
        }
        self.inner.write_line(stream, text).await
    }
}

fn config(dir: &TempDir) -> StreamConfig {
    StreamConfig::builder()
        .fallback_file(dir.path().join("fallback.json"))
        .auto_recovery(false)
        .build()
        .unwrap()
}

fn integration(
    config: StreamConfig,
    writer: Arc<dyn OutputWriter>,
    env: MockEnvironment,
) -> ReporterStreamIntegration {
    ReporterStreamIntegration::with_collaborators(
        config,
        writer,
        Arc::new(env),
        Arc::new(MockSystemProbe::new()),
    )
}

#[tokio::test]
async fn test_non_tty_degrades_to_plain_lines() {
    let dir = TempDir::new().unwrap();
    let writer = MockOutputWriter::new();
    let stream = integration(config(&dir), Arc::new(writer.clone()), MockEnvironment::new());

    stream.start();
    assert!(stream.is_degraded());

    stream
        .stream_test_result(&TestResult::passed("math.test.ts", "adds", 5))
        .await
        .unwrap();
    stream
        .stream_test_result(&TestResult::failed(
            "math.test.ts",
            "divides",
            7,
            "expected 2\nreceived 3",
        ))
        .await
        .unwrap();

    let summary = stream.stop().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.degraded);

    let lines = writer.lines(OutputStream::Stdout);
    assert_eq!(lines[0], "PASS math.test.ts > adds (5ms)");
    assert_eq!(lines[1], "FAIL math.test.ts > divides (7ms): expected 2");
    assert!(lines[2].starts_with("Tests: 2 total, 1 passed, 1 failed, 0 skipped"));

    let stats = stream.stats();
    assert_eq!(stats.counters.degraded_writes, 2);
    assert_eq!(stats.queue.total_enqueued, 0);
}

#[tokio::test]
async fn test_interactive_terminal_streams_json_through_queue() {
    let dir = TempDir::new().unwrap();
    let writer = MockOutputWriter::new();
    let stream = integration(
        config(&dir),
        Arc::new(writer.clone()),
        MockEnvironment::interactive(),
    );

    stream.start();
    assert!(!stream.is_degraded());

    stream
        .stream_test_result(&TestResult::passed("math.test.ts", "adds", 5))
        .await
        .unwrap();
    stream.stop().await.unwrap();

    let lines = writer.lines(OutputStream::Stdout);
    let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["type"], "test");
    assert_eq!(record["status"], "passed");
    assert_eq!(record["name"], "adds");

    let summary: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["total"], 1);

    let stats = stream.stats();
    assert_eq!(stats.queue.total_processed, 1);
    assert_eq!(stats.counters.structured_writes, 1);
}

#[tokio::test]
async fn test_forced_degradation_skips_detection_result() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.integration.force_degraded = true;
    let stream = integration(
        config,
        Arc::new(MockOutputWriter::new()),
        MockEnvironment::interactive(),
    );

    stream.start();
    assert!(stream.is_degraded());
    assert!(stream.environment().unwrap().is_tty);
    stream.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_write_recovers_and_falls_back_to_plain_output() {
    let dir = TempDir::new().unwrap();
    let writer = SelectiveWriter {
        fail_structured: true,
        ..Default::default()
    };
    let stream = integration(
        config(&dir),
        Arc::new(writer.clone()),
        MockEnvironment::interactive(),
    );
    stream.start();

    stream
        .stream_test_result(&TestResult::passed("math.test.ts", "adds", 5))
        .await
        .unwrap();

    assert_eq!(
        writer.inner.lines(OutputStream::Stdout),
        vec!["PASS math.test.ts > adds (5ms)".to_string()]
    );

    let error_stats = stream.error_stats().await;
    assert_eq!(error_stats.total_errors, 1);
    assert_eq!(error_stats.strategies_used[&RecoveryStrategy::FallbackFile], 1);

    let records = fallback::read_records(&dir.path().join("fallback.json"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "test");
    assert!(records[0].original_data.as_deref().unwrap().contains("\"adds\""));

    let recovery = stream.recovery_data().await;
    assert_eq!(recovery.recent_errors.len(), 1);
    assert_eq!(recovery.recent_errors[0].context.test_name.as_deref(), Some("adds"));

    let counters = stream.stats().counters;
    assert_eq!(counters.errors_handled, 1);
    assert_eq!(counters.fallbacks, 1);

    stream.stop().await.unwrap();
}

#[tokio::test]
async fn test_failure_propagates_without_graceful_degradation() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.integration.graceful_degradation = false;
    let writer = SelectiveWriter {
        fail_structured: true,
        ..Default::default()
    };
    let stream = integration(config, Arc::new(writer.clone()), MockEnvironment::interactive());
    stream.start();

    let err = stream
        .stream_test_result(&TestResult::passed("math.test.ts", "adds", 5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OUTPUT_WRITE_FAILED);
    assert!(writer.inner.lines(OutputStream::Stdout).is_empty());

    // The failure is still classified and recorded.
    assert_eq!(stream.error_stats().await.total_errors, 1);
    stream.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_always_stops_timers_even_when_flush_times_out() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.integration.flush_timeout = Duration::from_millis(50);
    config.integration.emit_summary = false;
    let writer = SelectiveWriter {
        delay: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    let stream = Arc::new(integration(
        config,
        Arc::new(writer),
        MockEnvironment::interactive(),
    ));
    stream.start();
    assert!(stream.health_monitor().is_running());

    let background = Arc::clone(&stream);
    tokio::spawn(async move {
        let _ = background
            .stream_test_result(&TestResult::passed("slow.test.ts", "waits", 1))
            .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = stream.stop().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TIMEOUT_FLUSH);
    assert!(err.is_timeout());
    assert!(!stream.health_monitor().is_running());
    assert!(!stream.is_started());
}

#[tokio::test]
async fn test_suite_and_console_output_in_degraded_mode() {
    let dir = TempDir::new().unwrap();
    let writer = MockOutputWriter::new();
    let stream = integration(config(&dir), Arc::new(writer.clone()), MockEnvironment::new());
    stream.start();

    stream.stream_suite_start("math", Some("math.test.ts")).await.unwrap();
    stream
        .stream_console_output("debug: x = 1", OutputStream::Stderr)
        .await
        .unwrap();
    stream
        .stream_suite_end("math", Some("math.test.ts"), 12)
        .await
        .unwrap();

    assert_eq!(
        writer.lines(OutputStream::Stdout),
        vec!["SUITE math".to_string(), "END math (12ms)".to_string()]
    );
    assert_eq!(writer.lines(OutputStream::Stderr), vec!["debug: x = 1".to_string()]);
    assert_eq!(stream.stats().counters.console_lines, 1);
    stream.stop().await.unwrap();
}

#[tokio::test]
async fn test_query_methods_report_activity() {
    let dir = TempDir::new().unwrap();
    let stream = integration(
        config(&dir),
        Arc::new(MockOutputWriter::new()),
        MockEnvironment::interactive(),
    );
    stream.start();

    for i in 0..3 {
        stream
            .stream_test_result(&TestResult::passed("a.test.ts", format!("case {i}"), 1))
            .await
            .unwrap();
    }
    stream
        .stream_test_result(&TestResult::skipped("a.test.ts", "todo"))
        .await
        .unwrap();

    let report = stream.diagnostics_report().await;
    assert_eq!(report.total_operations, 4);
    assert_eq!(report.successful_operations, 4);
    assert_eq!(report.active_operations, 0);

    let health = stream.health().await;
    assert_eq!(health.health, HealthStatus::Healthy);
    assert!(!health.circuit_breaker.is_open);

    let recovery = stream.recovery_data().await;
    assert!(recovery.recent_errors.is_empty());
    assert_eq!(recovery.fallback_file, dir.path().join("fallback.json"));

    let summary = stream.stop().await.unwrap();
    assert_eq!(summary.skipped, 1);
}
