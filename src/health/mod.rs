//! Stream health monitoring
//!
//! A periodic check samples latency, queue size, memory, throughput and the
//! recent error rate, classifies them into a [`HealthStatus`] and feeds the
//! circuit breaker. Moving into UNHEALTHY or FAILED starts one recovery run,
//! which maps the detected [`FailureMode`] to a recovery strategy and lets the
//! [`ErrorHandler`] execute it. State changes are published as
//! [`HealthEvent`]s on a broadcast channel.

pub mod circuit_breaker;
pub mod classify;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use classify::{classify_health, detect_failure_mode};

use crate::error::StreamError;
use crate::platform::SystemProbe;
use crate::recovery::{ErrorContext, ErrorHandler, ErrorType, RecoveryStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Anything that can report how much work is waiting
pub trait QueueGauge: Send + Sync {
    fn queue_size(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
    /// Set after a successful recovery until the next check
    Recovering,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Failed => "failed",
            HealthStatus::Recovering => "recovering",
        }
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy | HealthStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    ConnectionLoss,
    QueueOverflow,
    Deadlock,
    Performance,
    ResourceExhaustion,
    ConfigurationError,
    ExternalFailure,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::ConnectionLoss => "connection_loss",
            FailureMode::QueueOverflow => "queue_overflow",
            FailureMode::Deadlock => "deadlock",
            FailureMode::Performance => "performance",
            FailureMode::ResourceExhaustion => "resource_exhaustion",
            FailureMode::ConfigurationError => "configuration_error",
            FailureMode::ExternalFailure => "external_failure",
        }
    }

    /// Fixed recovery strategy for each failure mode
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            FailureMode::ConnectionLoss => RecoveryStrategy::Retry,
            FailureMode::QueueOverflow => RecoveryStrategy::Degrade,
            FailureMode::Deadlock => RecoveryStrategy::Skip,
            FailureMode::Performance => RecoveryStrategy::Degrade,
            FailureMode::ResourceExhaustion => RecoveryStrategy::Degrade,
            FailureMode::ConfigurationError => RecoveryStrategy::FallbackConsole,
            FailureMode::ExternalFailure => RecoveryStrategy::FallbackFile,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Base delay between recovery attempts, multiplied by the attempt number
    #[serde(default = "default_recovery_delay", with = "humantime_serde")]
    pub recovery_delay: Duration,

    /// Number of recorded operations used for the latency average
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,

    #[serde(default = "default_throughput_window", with = "humantime_serde")]
    pub throughput_window: Duration,

    #[serde(default = "default_error_rate_window", with = "humantime_serde")]
    pub error_rate_window: Duration,

    /// Denominator of the error rate
    #[serde(default = "default_error_rate_operations")]
    pub error_rate_operations: usize,

    #[serde(default = "default_true")]
    pub enable_auto_recovery: bool,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_latency_ms() -> u64 {
    1000
}

fn default_max_queue_size() -> usize {
    500
}

fn default_max_memory_mb() -> u64 {
    512
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_recovery_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_sample_window() -> usize {
    100
}

fn default_throughput_window() -> Duration {
    Duration::from_secs(10)
}

fn default_error_rate_window() -> Duration {
    Duration::from_secs(60)
}

fn default_error_rate_operations() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            max_latency_ms: default_max_latency_ms(),
            max_queue_size: default_max_queue_size(),
            max_memory_mb: default_max_memory_mb(),
            circuit_breaker: CircuitBreakerConfig::default(),
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_delay: default_recovery_delay(),
            sample_window: default_sample_window(),
            throughput_window: default_throughput_window(),
            error_rate_window: default_error_rate_window(),
            error_rate_operations: default_error_rate_operations(),
            enable_auto_recovery: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub latency_ms: f64,
    pub queue_size: usize,
    pub memory_mb: f64,
    /// Operations per second
    pub throughput: f64,
    pub error_rate: f64,
    /// Most frequent type among the recent errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_error_type: Option<ErrorType>,
    /// Global CPU usage, reported but not classified
    #[serde(default)]
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub failure_mode: FailureMode,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub strategy: RecoveryStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMonitoringData {
    pub health: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub performance: PerformanceSnapshot,
    pub circuit_breaker: CircuitBreakerState,
    pub recovery: Option<RecoveryState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    HealthChanged {
        from: HealthStatus,
        to: HealthStatus,
    },
    RecoveryStarted {
        failure_mode: FailureMode,
        strategy: RecoveryStrategy,
        attempt: u32,
    },
    RecoveryCompleted {
        failure_mode: FailureMode,
        strategy: RecoveryStrategy,
        attempt: u32,
    },
    RecoveryFailed {
        failure_mode: FailureMode,
        attempts: u32,
    },
    CircuitBreakerOpened {
        failure_count: u32,
    },
    CircuitBreakerClosed,
}

#[derive(Debug, Clone, Copy)]
struct OperationSample {
    at: Instant,
    latency: Duration,
}

struct MonitorInner {
    config: HealthConfig,
    probe: Arc<dyn SystemProbe>,
    gauge: Option<Arc<dyn QueueGauge>>,
    errors: Arc<ErrorHandler>,
    breaker: CircuitBreaker,
    data: RwLock<StreamMonitoringData>,
    samples: Mutex<VecDeque<OperationSample>>,
    recovering: AtomicBool,
    pinned_failed: AtomicBool,
    events: broadcast::Sender<HealthEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
}

/// Releases the one-recovery-at-a-time flag, also when the run is aborted
struct RecoveryGuard<'a>(&'a AtomicBool);

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodic health checker with circuit breaker and automatic recovery
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        probe: Arc<dyn SystemProbe>,
        gauge: Option<Arc<dyn QueueGauge>>,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
                config,
                probe,
                gauge,
                errors,
                data: RwLock::new(StreamMonitoringData::default()),
                samples: Mutex::new(VecDeque::new()),
                recovering: AtomicBool::new(false),
                pinned_failed: AtomicBool::new(false),
                events,
                task: Mutex::new(None),
                recovery_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: HealthEvent) {
        debug!(?event, "Health event");
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Start the periodic check. Calling it twice keeps the first timer.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = self.clone();
        let period = self.inner.config.check_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                monitor.perform_health_check().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Health monitor started");
    }

    /// Stop the periodic check and cancel an automatic recovery in flight
    pub fn stop(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Health monitor stopped");
        }

        let recovery = self
            .inner
            .recovery_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(recovery) = recovery {
            if !recovery.is_finished() {
                recovery.abort();
                if let Ok(mut data) = self.inner.data.try_write() {
                    data.recovery = None;
                }
                warn!("Cancelled stream recovery in progress");
            }
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

    /// Feed one completed operation's latency into the sample window
    pub fn record_operation(&self, latency: Duration) {
        let mut samples = self.inner.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back(OperationSample {
            at: Instant::now(),
            latency,
        });
        while samples.len() > self.inner.config.sample_window.max(1) {
            samples.pop_front();
        }
    }

    /// Current performance metrics, without classifying them
    pub async fn sample_metrics(&self) -> PerformanceSnapshot {
        let config = &self.inner.config;
        let (latency_ms, recent) = {
            let samples = self.inner.samples.lock().unwrap_or_else(PoisonError::into_inner);
            let latency_ms = if samples.is_empty() {
                0.0
            } else {
                samples
                    .iter()
                    .map(|s| s.latency.as_secs_f64() * 1000.0)
                    .sum::<f64>()
                    / samples.len() as f64
            };
            let now = Instant::now();
            let recent = samples
                .iter()
                .filter(|s| now.duration_since(s.at) <= config.throughput_window)
                .count();
            (latency_ms, recent)
        };

        let window_secs = config.throughput_window.as_secs_f64();
        let throughput = if window_secs > 0.0 {
            recent as f64 / window_secs
        } else {
            0.0
        };

        let recent_errors = self
            .inner
            .errors
            .recent_errors(config.error_rate_window)
            .await;
        let error_rate =
            (recent_errors.len() as f64 / config.error_rate_operations.max(1) as f64).min(1.0);

        let mut by_type: BTreeMap<ErrorType, usize> = BTreeMap::new();
        for error in &recent_errors {
            *by_type.entry(error.error_type).or_insert(0) += 1;
        }
        let dominant_error_type = by_type
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(error_type, _)| error_type);

        PerformanceSnapshot {
            latency_ms,
            queue_size: self.inner.gauge.as_ref().map_or(0, |g| g.queue_size()),
            memory_mb: self.inner.probe.memory_usage_bytes() as f64 / (1024.0 * 1024.0),
            throughput,
            error_rate,
            dominant_error_type,
            cpu_percent: f64::from(self.inner.probe.cpu_usage_percent()),
        }
    }

    /// Sample, classify and update the breaker. Starts recovery in the
    /// background when health moves into UNHEALTHY or FAILED.
    pub async fn perform_health_check(&self) -> HealthStatus {
        let config = &self.inner.config;
        let metrics = self.sample_metrics().await;

        // The breaker is fed from the metrics alone so an open breaker can
        // still observe a healthy sample and close.
        let observed = classify_health(&metrics, config, false);
        if observed.is_failing() {
            if self.inner.breaker.record_failure() {
                self.emit(HealthEvent::CircuitBreakerOpened {
                    failure_count: self.inner.breaker.state().failure_count,
                });
            }
        } else if observed == HealthStatus::Healthy && self.inner.breaker.record_healthy() {
            self.emit(HealthEvent::CircuitBreakerClosed);
        }

        let breaker_open = self.inner.breaker.is_open();
        let status = if self.inner.pinned_failed.load(Ordering::SeqCst) {
            HealthStatus::Failed
        } else {
            classify_health(&metrics, config, breaker_open)
        };

        let previous = {
            let mut data = self.inner.data.write().await;
            let previous = data.health;
            data.health = status;
            data.last_check = Some(Utc::now());
            data.performance = metrics.clone();
            data.circuit_breaker = self.inner.breaker.state();
            if status.is_failing() {
                data.consecutive_failures = data.consecutive_failures.saturating_add(1);
                data.consecutive_successes = 0;
            } else if status == HealthStatus::Healthy {
                data.consecutive_successes = data.consecutive_successes.saturating_add(1);
                data.consecutive_failures = 0;
            }
            previous
        };

        if previous != status {
            info!(
                from = previous.as_str(),
                to = status.as_str(),
                latency_ms = metrics.latency_ms,
                queue_size = metrics.queue_size,
                error_rate = metrics.error_rate,
                "Stream health changed"
            );
            self.emit(HealthEvent::HealthChanged {
                from: previous,
                to: status,
            });

            if status.is_failing() && config.enable_auto_recovery {
                let mode = detect_failure_mode(&metrics, config, breaker_open);
                self.spawn_recovery(mode);
            }
        }

        status
    }

    /// Background recovery owned by the monitor, so `stop()` can cancel it
    fn spawn_recovery(&self, mode: FailureMode) {
        let mut slot = self
            .inner
            .recovery_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(failure_mode = mode.as_str(), "Recovery already in progress");
            return;
        }

        let monitor = self.clone();
        *slot = Some(tokio::spawn(async move {
            monitor.trigger_recovery(mode).await;
        }));
    }

    /// Run recovery for `mode`. Returns false when another recovery is
    /// already running or every attempt failed.
    pub async fn trigger_recovery(&self, mode: FailureMode) -> bool {
        if self
            .inner
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(failure_mode = mode.as_str(), "Recovery already in progress");
            return false;
        }

        let _guard = RecoveryGuard(&self.inner.recovering);
        self.run_recovery(mode).await
    }

    async fn run_recovery(&self, mode: FailureMode) -> bool {
        let config = &self.inner.config;
        let strategy = mode.recovery_strategy();
        let attempts = config.max_recovery_attempts.max(1);

        for attempt in 1..=attempts {
            self.inner.data.write().await.recovery = Some(RecoveryState {
                failure_mode: mode,
                attempt,
                started_at: Utc::now(),
                strategy,
            });
            info!(
                failure_mode = mode.as_str(),
                strategy = strategy.as_str(),
                attempt,
                "Starting stream recovery"
            );
            self.emit(HealthEvent::RecoveryStarted {
                failure_mode: mode,
                strategy,
                attempt,
            });

            let synthetic = self.inner.errors.classify(
                &StreamError::other(format!("health monitor detected {}", mode.as_str())),
                ErrorContext::new("health_recovery").with_attempt(attempt),
            );
            let result = self.inner.errors.execute_strategy(strategy, &synthetic).await;

            if result.success {
                let previous = {
                    let mut data = self.inner.data.write().await;
                    let previous = data.health;
                    data.health = HealthStatus::Recovering;
                    data.recovery = None;
                    previous
                };
                info!(failure_mode = mode.as_str(), attempt, "Stream recovery completed");
                self.emit(HealthEvent::RecoveryCompleted {
                    failure_mode: mode,
                    strategy,
                    attempt,
                });
                if previous != HealthStatus::Recovering {
                    self.emit(HealthEvent::HealthChanged {
                        from: previous,
                        to: HealthStatus::Recovering,
                    });
                }
                return true;
            }

            warn!(
                failure_mode = mode.as_str(),
                attempt,
                error = result.error.as_deref().unwrap_or_default(),
                "Stream recovery attempt failed"
            );
            if attempt < attempts {
                tokio::time::sleep(config.recovery_delay.saturating_mul(attempt)).await;
            }
        }

        self.inner.pinned_failed.store(true, Ordering::SeqCst);
        let previous = {
            let mut data = self.inner.data.write().await;
            let previous = data.health;
            data.health = HealthStatus::Failed;
            data.recovery = None;
            previous
        };
        error!(failure_mode = mode.as_str(), attempts, "Stream recovery failed");
        self.emit(HealthEvent::RecoveryFailed {
            failure_mode: mode,
            attempts,
        });
        if previous != HealthStatus::Failed {
            self.emit(HealthEvent::HealthChanged {
                from: previous,
                to: HealthStatus::Failed,
            });
        }
        false
    }

    pub async fn health(&self) -> HealthStatus {
        self.inner.data.read().await.health
    }

    pub async fn monitoring_data(&self) -> StreamMonitoringData {
        let mut data = self.inner.data.read().await.clone();
        data.circuit_breaker = self.inner.breaker.state();
        data
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerState {
        self.inner.breaker.state()
    }

    pub async fn reset_circuit_breaker(&self) {
        self.inner.breaker.reset();
        self.inner.data.write().await.circuit_breaker = self.inner.breaker.state();
        info!("Circuit breaker reset");
    }

    /// Forget all samples, counters and a pinned FAILED state
    pub async fn reset(&self) {
        self.inner.breaker.reset();
        self.inner.pinned_failed.store(false, Ordering::SeqCst);
        self.inner
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.inner.data.write().await = StreamMonitoringData::default();
    }
}
