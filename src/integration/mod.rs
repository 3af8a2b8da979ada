//! Reporter-facing orchestrator
//!
//! [`ReporterStreamIntegration`] owns one queue-backed output sink plus one
//! error handler, health monitor and diagnostics instance. The host reporter
//! calls [`start`](ReporterStreamIntegration::start), streams results
//! through [`stream_test_result`](ReporterStreamIntegration::stream_test_result)
//! and finishes with [`stop`](ReporterStreamIntegration::stop).
//!
//! When the environment cannot take the structured stream (no TTY, CI, or a
//! terminal with neither color nor width) every write bypasses the queue and
//! goes out as a plain line instead.

pub mod environment;

pub use environment::{EnvironmentInfo, EnvironmentProbe, RealEnvironment};

use crate::config::StreamConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsReport};
use crate::error::{ErrorCode, Result, StreamError};
use crate::health::{
    CircuitBreakerState, HealthEvent, HealthMonitor, RecoveryState, StreamMonitoringData,
};
use crate::output::{OutputStream, OutputWriter, StdioWriter};
use crate::platform::{SysinfoProbe, SystemProbe};
use crate::queue::{
    OperationOptions, OperationResult, OutputSource, Priority, QueueStats, TestOutputQueue,
};
use crate::recovery::{ErrorContext, ErrorHandler, ErrorStats, StreamErrorContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }

    /// Failures are streamed ahead of passes, skips last
    pub fn priority(&self) -> Priority {
        match self {
            TestStatus::Failed => Priority::High,
            TestStatus::Passed => Priority::Normal,
            TestStatus::Skipped => Priority::Low,
        }
    }
}

/// One finished test, as handed over by the host reporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub file: String,
    pub name: String,
    pub status: TestStatus,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
}

impl TestResult {
    pub fn passed(file: impl Into<String>, name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            status: TestStatus::Passed,
            duration_ms,
            error: None,
            suite: None,
        }
    }

    pub fn failed(
        file: impl Into<String>,
        name: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            status: TestStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            suite: None,
        }
    }

    pub fn skipped(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            status: TestStatus::Skipped,
            duration_ms: 0,
            error: None,
            suite: None,
        }
    }

    /// Structured stream record
    pub fn to_record(&self) -> serde_json::Value {
        json!({
            "type": "test",
            "file": self.file,
            "name": self.name,
            "status": self.status,
            "duration": self.duration_ms,
            "error": self.error,
            "suite": self.suite,
        })
    }

    /// Plain line used in degraded mode
    pub fn to_line(&self) -> String {
        let label = match self.status {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
            TestStatus::Skipped => "SKIP",
        };
        let mut line = format!("{label} {} > {}", self.file, self.name);
        if self.status != TestStatus::Skipped {
            line.push_str(&format!(" ({}ms)", self.duration_ms));
        }
        if let Some(error) = &self.error {
            line.push_str(": ");
            line.push_str(error.lines().next().unwrap_or_default());
        }
        line
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Fall back to plain output instead of surfacing recoverable failures
    #[serde(default = "default_true")]
    pub graceful_degradation: bool,

    /// Skip environment detection and always write plain lines
    #[serde(default)]
    pub force_degraded: bool,

    #[serde(default = "default_min_terminal_width")]
    pub min_terminal_width: u16,

    /// Upper bound on draining the queue in `stop()`
    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,

    #[serde(default = "default_true")]
    pub emit_summary: bool,
}

fn default_true() -> bool {
    true
}

fn default_min_terminal_width() -> u16 {
    40
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            graceful_degradation: true,
            force_degraded: false,
            min_terminal_width: default_min_terminal_width(),
            flush_timeout: default_flush_timeout(),
            emit_summary: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounters {
    pub tests_streamed: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub console_lines: u64,
    pub structured_writes: u64,
    pub degraded_writes: u64,
    pub errors_handled: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub started: bool,
    pub degraded: bool,
    pub environment: Option<EnvironmentInfo>,
    pub counters: StreamCounters,
    pub queue: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryData {
    pub circuit_breaker: CircuitBreakerState,
    pub recovery: Option<RecoveryState>,
    pub recent_errors: Vec<StreamErrorContext>,
    pub fallback_file: PathBuf,
}

/// Final tallies written when the stream stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors_handled: u64,
    pub degraded: bool,
    pub duration_ms: u64,
}

impl StreamSummary {
    pub fn to_line(&self) -> String {
        format!(
            "Tests: {} total, {} passed, {} failed, {} skipped ({}ms)",
            self.total, self.passed, self.failed, self.skipped, self.duration_ms
        )
    }
}

/// One write routed either through the queue or straight to the writer
struct Emission {
    operation: &'static str,
    priority: Priority,
    source: OutputSource,
    stream: OutputStream,
    structured: String,
    degraded: String,
    test: Option<(String, String)>,
}

pub struct ReporterStreamIntegration {
    config: StreamConfig,
    writer: Arc<dyn OutputWriter>,
    env: Arc<dyn EnvironmentProbe>,
    queue: TestOutputQueue,
    errors: Arc<ErrorHandler>,
    health: HealthMonitor,
    diagnostics: Diagnostics,
    started: AtomicBool,
    degraded: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    environment: Mutex<Option<EnvironmentInfo>>,
    counters: Mutex<StreamCounters>,
}

impl ReporterStreamIntegration {
    /// Orchestrator writing to the process stdout/stderr
    pub fn new(config: StreamConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(StdioWriter),
            Arc::new(RealEnvironment),
            Arc::new(SysinfoProbe::new()),
        )
    }

    pub fn with_collaborators(
        config: StreamConfig,
        writer: Arc<dyn OutputWriter>,
        env: Arc<dyn EnvironmentProbe>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let queue = TestOutputQueue::new(config.queue.clone());
        let errors = Arc::new(ErrorHandler::new(config.recovery.clone(), Arc::clone(&writer)));
        let health = HealthMonitor::new(
            config.health.clone(),
            probe,
            Some(Arc::new(queue.queue().clone())),
            Arc::clone(&errors),
        );
        let diagnostics = Diagnostics::new(config.diagnostics.clone());

        Self {
            config,
            writer,
            env,
            queue,
            errors,
            health,
            diagnostics,
            started: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            started_at: Mutex::new(None),
            environment: Mutex::new(None),
            counters: Mutex::new(StreamCounters::default()),
        }
    }

    fn counters(&self) -> MutexGuard<'_, StreamCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start timers and decide once whether output is degraded
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Stream integration already started");
            return;
        }

        self.diagnostics.start();
        self.health.start();

        let info = EnvironmentInfo::detect(self.env.as_ref());
        let degraded = self.config.integration.force_degraded
            || info.should_degrade(self.config.integration.min_terminal_width);
        self.degraded.store(degraded, Ordering::SeqCst);
        info!(
            degraded,
            tty = info.is_tty,
            ci = info.is_ci,
            color = info.supports_color,
            "Stream integration started"
        );

        *self.environment.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn environment(&self) -> Option<EnvironmentInfo> {
        self.environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stream one finished test
    pub async fn stream_test_result(&self, result: &TestResult) -> Result<()> {
        {
            let mut counters = self.counters();
            counters.tests_streamed += 1;
            match result.status {
                TestStatus::Passed => counters.passed += 1,
                TestStatus::Failed => counters.failed += 1,
                TestStatus::Skipped => counters.skipped += 1,
            }
        }

        let emission = Emission {
            operation: "stream_test_result",
            priority: result.status.priority(),
            source: OutputSource::Test,
            stream: OutputStream::Stdout,
            structured: result.to_record().to_string(),
            degraded: result.to_line(),
            test: Some((result.file.clone(), result.name.clone())),
        };
        let metadata = HashMap::from([
            ("file".to_string(), result.file.clone()),
            ("name".to_string(), result.name.clone()),
            ("status".to_string(), result.status.as_str().to_string()),
        ]);
        self.emit(emission, metadata).await
    }

    /// Stream captured console output of the tests
    pub async fn stream_console_output(&self, text: &str, stream: OutputStream) -> Result<()> {
        self.counters().console_lines += 1;
        let emission = Emission {
            operation: "stream_console_output",
            priority: Priority::Low,
            source: OutputSource::Console,
            stream,
            structured: json!({ "type": "console", "stream": stream, "text": text }).to_string(),
            degraded: text.to_string(),
            test: None,
        };
        self.emit(emission, HashMap::new()).await
    }

    pub async fn stream_suite_start(&self, name: &str, file: Option<&str>) -> Result<()> {
        self.stream_suite_event("suite_start", name, file, None).await
    }

    pub async fn stream_suite_end(
        &self,
        name: &str,
        file: Option<&str>,
        duration_ms: u64,
    ) -> Result<()> {
        self.stream_suite_event("suite_end", name, file, Some(duration_ms))
            .await
    }

    async fn stream_suite_event(
        &self,
        kind: &'static str,
        name: &str,
        file: Option<&str>,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        let degraded = match (kind, duration_ms) {
            ("suite_end", Some(ms)) => format!("END {name} ({ms}ms)"),
            ("suite_end", None) => format!("END {name}"),
            _ => format!("SUITE {name}"),
        };
        let emission = Emission {
            operation: "stream_suite_event",
            priority: Priority::High,
            source: OutputSource::Suite,
            stream: OutputStream::Stdout,
            structured: json!({
                "type": kind,
                "name": name,
                "file": file,
                "duration": duration_ms,
            })
            .to_string(),
            degraded,
            test: None,
        };
        self.emit(emission, HashMap::from([("suite".to_string(), name.to_string())]))
            .await
    }

    async fn emit(&self, emission: Emission, metadata: HashMap<String, String>) -> Result<()> {
        let op_id = self
            .diagnostics
            .track_operation_start(emission.operation, metadata);
        let started = Instant::now();

        let outcome = if self.is_degraded() {
            self.write_degraded(emission.stream, &emission.degraded).await
        } else {
            self.write_structured(&emission).await
        };
        self.health.record_operation(started.elapsed());

        let err = match outcome {
            Ok(()) => {
                self.diagnostics
                    .track_operation_complete(op_id, HashMap::new())
                    .await;
                return Ok(());
            }
            Err(err) => err,
        };

        self.diagnostics.track_operation_error(op_id, &err).await;
        self.counters().errors_handled += 1;

        let mut context = ErrorContext::new(emission.operation)
            .with_priority(emission.priority)
            .with_source(emission.source)
            .with_data(emission.structured.clone());
        if let Some((file, name)) = &emission.test {
            context = context.with_test(file.clone(), name.clone());
        }
        let recovery = self.errors.handle_error(&err, context).await;

        if recovery.is_abort() || !self.config.integration.graceful_degradation {
            error!(
                operation = emission.operation,
                strategy = recovery.strategy.as_str(),
                "Stream write failed: {}",
                err
            );
            return Err(err);
        }

        self.counters().fallbacks += 1;
        if let Err(fallback) = self.write_degraded(emission.stream, &emission.degraded).await {
            warn!(
                operation = emission.operation,
                error = %fallback,
                "Degraded fallback write failed; output dropped"
            );
        }
        Ok(())
    }

    async fn write_degraded(&self, stream: OutputStream, line: &str) -> Result<()> {
        self.writer.write_line(stream, line).await?;
        self.counters().degraded_writes += 1;
        Ok(())
    }

    async fn write_structured(&self, emission: &Emission) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let stream = emission.stream;
        let line = emission.structured.clone();
        let executor = move || async move { writer.write_line(stream, &line).await };

        let settled: OperationResult = match &emission.test {
            Some((file, name)) => {
                self.queue
                    .enqueue_test_output(
                        file,
                        name,
                        emission.priority,
                        emission.structured.clone(),
                        executor,
                    )
                    .await
            }
            None => {
                self.queue
                    .queue()
                    .enqueue(
                        emission.priority,
                        emission.source,
                        emission.structured.clone(),
                        executor,
                        OperationOptions::default(),
                    )
                    .await
            }
        };
        settled?;
        self.counters().structured_writes += 1;
        Ok(())
    }

    /// Flush, write the summary and stop every timer.
    ///
    /// The timers are stopped even when flushing times out; the flush error
    /// is returned afterwards.
    pub async fn stop(&self) -> Result<StreamSummary> {
        let flushed = self.flush().await;
        let summary = self.summary();

        if self.config.integration.emit_summary && self.is_started() {
            if let Err(e) = self.write_summary(&summary).await {
                warn!(error = %e, "Failed to write stream summary");
            }
        }

        self.health.stop();
        self.diagnostics.stop();
        self.started.store(false, Ordering::SeqCst);
        info!(
            total = summary.total,
            failed = summary.failed,
            errors = summary.errors_handled,
            "Stream integration stopped"
        );

        flushed.map(|()| summary)
    }

    async fn flush(&self) -> Result<()> {
        let timeout = self.config.integration.flush_timeout;
        if tokio::time::timeout(timeout, self.queue.drain())
            .await
            .is_ok()
        {
            return Ok(());
        }

        let pending = self.queue.len();
        warn!(pending, "Flush timed out; clearing remaining output");
        self.queue.clear();
        Err(StreamError::timeout_with_code(
            ErrorCode::TIMEOUT_FLUSH,
            format!(
                "flush timeout after {}ms with {} operations pending",
                timeout.as_millis(),
                pending
            ),
            timeout,
        ))
    }

    fn summary(&self) -> StreamSummary {
        let counters = self.counters().clone();
        let duration_ms = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(0, |at| at.elapsed().as_millis() as u64);
        StreamSummary {
            total: counters.tests_streamed,
            passed: counters.passed,
            failed: counters.failed,
            skipped: counters.skipped,
            errors_handled: counters.errors_handled,
            degraded: self.is_degraded(),
            duration_ms,
        }
    }

    async fn write_summary(&self, summary: &StreamSummary) -> Result<()> {
        // Written directly: the queue may have been cleared by a failed flush.
        let line = if self.is_degraded() {
            summary.to_line()
        } else {
            let mut record = serde_json::to_value(summary)?;
            record["type"] = json!("summary");
            record.to_string()
        };
        self.writer.write_line(OutputStream::Stdout, &line).await
    }

    pub fn stats(&self) -> IntegrationStats {
        IntegrationStats {
            started: self.is_started(),
            degraded: self.is_degraded(),
            environment: self.environment(),
            counters: self.counters().clone(),
            queue: self.queue.stats(),
        }
    }

    pub async fn health(&self) -> StreamMonitoringData {
        self.health.monitoring_data().await
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health.subscribe()
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    pub async fn error_stats(&self) -> ErrorStats {
        self.errors.stats().await
    }

    pub async fn diagnostics_report(&self) -> DiagnosticsReport {
        self.diagnostics.generate_report().await
    }

    pub async fn recovery_data(&self) -> RecoveryData {
        let monitoring = self.health.monitoring_data().await;
        RecoveryData {
            circuit_breaker: monitoring.circuit_breaker,
            recovery: monitoring.recovery,
            recent_errors: self
                .errors
                .recent_errors(self.config.health.error_rate_window)
                .await,
            fallback_file: self.config.recovery.fallback_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests;
