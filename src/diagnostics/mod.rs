//! Operation tracking and performance sampling
//!
//! Diagnostics only observe. Nothing here feeds back into scheduling or
//! recovery decisions; the report exists for the host reporter to embed.

pub mod report;

pub use report::DiagnosticsReport;

use crate::error::StreamError;
use crate::recovery::{classify_error, ErrorContext, ErrorSeverity, ErrorType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Completed operations kept in history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Performance samples kept
    #[serde(default = "default_performance_history")]
    pub performance_history: usize,

    /// Operations slower than this log a warning
    #[serde(default = "default_latency_warning", with = "humantime_serde")]
    pub latency_warning_threshold: Duration,

    /// Most recent operations each sample is computed over
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

fn default_sampling_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_history() -> usize {
    1000
}

fn default_performance_history() -> usize {
    100
}

fn default_latency_warning() -> Duration {
    Duration::from_millis(100)
}

fn default_sample_size() -> usize {
    100
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            max_history: default_max_history(),
            performance_history: default_performance_history(),
            latency_warning_threshold: default_latency_warning(),
            sample_size: default_sample_size(),
        }
    }
}

/// One tracked operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub id: Uuid,
    pub operation_type: String,
    #[serde(skip, default = "Instant::now")]
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    pub severity: Option<ErrorSeverity>,
    pub metadata: HashMap<String, String>,
}

impl OperationMetrics {
    fn close(&mut self, success: bool) -> Duration {
        let elapsed = self.start_time.elapsed();
        self.ended_at = Some(Utc::now());
        self.duration_ms = Some(elapsed.as_secs_f64() * 1000.0);
        self.success = Some(success);
        elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub operations: usize,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Operations per second across the sampled span
    pub throughput: f64,
    pub error_rate: f64,
}

/// Nearest-rank percentile over an ascending slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl PerformanceSample {
    /// Compute a sample over completed operations, `None` when there are none
    pub fn from_operations<'a>(
        operations: impl IntoIterator<Item = &'a OperationMetrics>,
    ) -> Option<Self> {
        let operations: Vec<&OperationMetrics> = operations.into_iter().collect();
        let mut latencies: Vec<f64> = operations.iter().filter_map(|op| op.duration_ms).collect();
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_by(f64::total_cmp);

        let failed = operations
            .iter()
            .filter(|op| op.success == Some(false))
            .count();
        let first_start = operations.iter().map(|op| op.started_at).min();
        let last_end = operations.iter().filter_map(|op| op.ended_at).max();
        let span_secs = match (first_start, last_end) {
            (Some(start), Some(end)) => (end - start).num_microseconds().unwrap_or(0) as f64 / 1e6,
            _ => 0.0,
        };

        let count = latencies.len();
        Some(Self {
            timestamp: Utc::now(),
            operations: count,
            average_latency_ms: latencies.iter().sum::<f64>() / count as f64,
            p95_latency_ms: percentile(&latencies, 95.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            max_latency_ms: latencies[count - 1],
            throughput: if span_secs > 0.0 {
                count as f64 / span_secs
            } else {
                0.0
            },
            error_rate: failed as f64 / operations.len() as f64,
        })
    }
}

struct DiagnosticsInner {
    config: DiagnosticsConfig,
    active: Mutex<HashMap<Uuid, OperationMetrics>>,
    history: RwLock<VecDeque<OperationMetrics>>,
    performance: RwLock<VecDeque<PerformanceSample>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<DiagnosticsInner>,
}

impl Diagnostics {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            inner: Arc::new(DiagnosticsInner {
                config,
                active: Mutex::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                performance: RwLock::new(VecDeque::new()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.inner.config
    }

    /// Start the periodic performance sampler
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let diagnostics = self.clone();
        let period = self.inner.config.sampling_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                diagnostics.sample_performance().await;
            }
        }));
        debug!("Diagnostics sampler started");
    }

    pub fn stop(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Diagnostics sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn track_operation_start(
        &self,
        operation_type: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let metrics = OperationMetrics {
            id,
            operation_type: operation_type.into(),
            start_time: Instant::now(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            success: None,
            error: None,
            error_type: None,
            severity: None,
            metadata,
        };
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, metrics);
        id
    }

    fn take_active(&self, id: Uuid) -> Option<OperationMetrics> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Close a tracked operation as successful. Unknown ids are ignored.
    pub async fn track_operation_complete(
        &self,
        id: Uuid,
        metadata: HashMap<String, String>,
    ) -> Option<OperationMetrics> {
        let mut metrics = self.take_active(id)?;
        metrics.metadata.extend(metadata);
        let elapsed = metrics.close(true);
        self.warn_if_slow(&metrics, elapsed);
        self.push_history(metrics.clone()).await;
        Some(metrics)
    }

    /// Close a tracked operation as failed. Unknown ids are ignored.
    pub async fn track_operation_error(
        &self,
        id: Uuid,
        error: &StreamError,
    ) -> Option<OperationMetrics> {
        let mut metrics = self.take_active(id)?;
        let (error_type, severity) = classify_error(
            error.message(),
            error.name(),
            &ErrorContext::new(metrics.operation_type.clone()),
        );
        metrics.error = Some(error.to_string());
        metrics.error_type = Some(error_type);
        metrics.severity = Some(severity);
        let elapsed = metrics.close(false);
        self.warn_if_slow(&metrics, elapsed);
        self.push_history(metrics.clone()).await;
        Some(metrics)
    }

    fn warn_if_slow(&self, metrics: &OperationMetrics, elapsed: Duration) {
        let threshold = self.inner.config.latency_warning_threshold;
        if elapsed > threshold {
            warn!(
                operation = %metrics.operation_type,
                id = %metrics.id,
                duration_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Slow stream operation"
            );
        }
    }

    async fn push_history(&self, metrics: OperationMetrics) {
        let mut history = self.inner.history.write().await;
        history.push_back(metrics);
        while history.len() > self.inner.config.max_history {
            history.pop_front();
        }
    }

    /// Compute and store one performance sample over the most recent operations
    pub async fn sample_performance(&self) -> Option<PerformanceSample> {
        let sample = {
            let history = self.inner.history.read().await;
            let skip = history.len().saturating_sub(self.inner.config.sample_size);
            PerformanceSample::from_operations(history.iter().skip(skip))?
        };

        debug!(
            operations = sample.operations,
            p95_ms = sample.p95_latency_ms,
            throughput = sample.throughput,
            "Performance sample"
        );

        let mut performance = self.inner.performance.write().await;
        performance.push_back(sample.clone());
        while performance.len() > self.inner.config.performance_history {
            performance.pop_front();
        }
        Some(sample)
    }

    pub fn active_operations(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn operation_history(&self) -> Vec<OperationMetrics> {
        self.inner.history.read().await.iter().cloned().collect()
    }

    pub async fn performance_history(&self) -> Vec<PerformanceSample> {
        self.inner.performance.read().await.iter().cloned().collect()
    }

    pub async fn generate_report(&self) -> DiagnosticsReport {
        let latest = self.inner.performance.read().await.back().cloned();
        let history = self.inner.history.read().await;
        let report = DiagnosticsReport::build(
            &self.inner.config,
            history.iter(),
            latest,
            self.active_operations(),
        );
        info!(
            total = report.total_operations,
            failed = report.failed_operations,
            "Generated diagnostics report"
        );
        report
    }

    pub async fn clear(&self) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.history.write().await.clear();
        self.inner.performance.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics() -> Diagnostics {
        Diagnostics::new(DiagnosticsConfig {
            max_history: 5,
            performance_history: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 95.0), 95.0);
        assert_eq!(percentile(&values, 99.0), 99.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[tokio::test]
    async fn test_track_complete_and_error() {
        let diagnostics = diagnostics();
        let ok = diagnostics.track_operation_start("stream_test_result", HashMap::new());
        let bad = diagnostics.track_operation_start("stream_test_result", HashMap::new());
        assert_eq!(diagnostics.active_operations(), 2);

        let completed = diagnostics
            .track_operation_complete(ok, HashMap::from([("status".into(), "passed".into())]))
            .await
            .unwrap();
        assert_eq!(completed.success, Some(true));
        assert!(completed.duration_ms.is_some());
        assert_eq!(completed.metadata["status"], "passed");

        let failed = diagnostics
            .track_operation_error(bad, &StreamError::output("write failed"))
            .await
            .unwrap();
        assert_eq!(failed.success, Some(false));
        assert_eq!(failed.error_type, Some(ErrorType::Output));

        assert_eq!(diagnostics.active_operations(), 0);
        assert!(diagnostics
            .track_operation_complete(ok, HashMap::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let diagnostics = diagnostics();
        for _ in 0..8 {
            let id = diagnostics.track_operation_start("op", HashMap::new());
            diagnostics.track_operation_complete(id, HashMap::new()).await;
        }
        assert_eq!(diagnostics.operation_history().await.len(), 5);
    }

    #[tokio::test]
    async fn test_performance_samples_are_bounded() {
        let diagnostics = diagnostics();
        assert!(diagnostics.sample_performance().await.is_none());

        let id = diagnostics.track_operation_start("op", HashMap::new());
        diagnostics.track_operation_complete(id, HashMap::new()).await;
        let id = diagnostics.track_operation_start("op", HashMap::new());
        diagnostics
            .track_operation_error(id, &StreamError::execution("boom"))
            .await;

        for _ in 0..3 {
            let sample = diagnostics.sample_performance().await.unwrap();
            assert_eq!(sample.operations, 2);
            assert!((sample.error_rate - 0.5).abs() < 1e-9);
            assert!(sample.max_latency_ms >= sample.p95_latency_ms);
        }
        assert_eq!(diagnostics.performance_history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_runs_until_stopped() {
        let diagnostics = Diagnostics::new(DiagnosticsConfig {
            sampling_interval: Duration::from_secs(1),
            ..Default::default()
        });
        let id = diagnostics.track_operation_start("op", HashMap::new());
        diagnostics.track_operation_complete(id, HashMap::new()).await;

        diagnostics.start();
        assert!(diagnostics.is_running());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(diagnostics.performance_history().await.len(), 2);

        diagnostics.stop();
        assert!(!diagnostics.is_running());
    }
}
