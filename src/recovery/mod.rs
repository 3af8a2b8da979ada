//! Error classification and recovery
//!
//! Every failure is classified into a type and severity, mapped to a
//! recovery strategy, and the strategy is executed locally. Only an abort is
//! meant to reach the caller; the other strategies change the output channel
//! or drop the operation.

pub mod classify;
pub mod fallback;
pub mod stats;

pub use classify::{classify_error, determine_recovery_strategy, escalate_severity};
pub use fallback::{FallbackError, FallbackRecord};
pub use stats::ErrorStats;

use crate::error::{ErrorCode, StreamError};
use crate::output::{OutputStream, OutputWriter};
use crate::queue::{OutputSource, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Connection,
    Queue,
    Synchronization,
    Output,
    Configuration,
    Execution,
    Resource,
    Timeout,
    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 9] = [
        ErrorType::Connection,
        ErrorType::Queue,
        ErrorType::Synchronization,
        ErrorType::Output,
        ErrorType::Configuration,
        ErrorType::Execution,
        ErrorType::Resource,
        ErrorType::Timeout,
        ErrorType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Connection => "connection",
            ErrorType::Queue => "queue",
            ErrorType::Synchronization => "synchronization",
            ErrorType::Output => "output",
            ErrorType::Configuration => "configuration",
            ErrorType::Execution => "execution",
            ErrorType::Resource => "resource",
            ErrorType::Timeout => "timeout",
            ErrorType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Critical,
    High,
    Normal,
    Low,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::High => "high",
            ErrorSeverity::Normal => "normal",
            ErrorSeverity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    FallbackFile,
    FallbackConsole,
    Skip,
    Degrade,
    Abort,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::FallbackFile => "fallback_file",
            RecoveryStrategy::FallbackConsole => "fallback_console",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Degrade => "degrade",
            RecoveryStrategy::Abort => "abort",
        }
    }
}

/// Where a failure happened, as known by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation label, e.g. `stream_test_result`
    pub operation: String,
    pub operation_id: Option<Uuid>,
    pub priority: Option<Priority>,
    pub source: Option<OutputSource>,
    pub test_file: Option<String>,
    pub test_name: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Payload that could not be written, kept for the fallback file
    pub data: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attempt: 1,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_source(mut self, source: OutputSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_test(mut self, file: impl Into<String>, name: impl Into<String>) -> Self {
        self.test_file = Some(file.into());
        self.test_name = Some(name.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// One classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorContext {
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub context: ErrorContext,
    pub error_message: String,
    pub error_name: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
}

/// Outcome of one recovery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub strategy: RecoveryStrategy,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryResult {
    /// Whether the caller must see the original failure
    pub fn is_abort(&self) -> bool {
        self.strategy == RecoveryStrategy::Abort
    }

    /// The error to surface when this recovery did not succeed
    pub fn to_error(&self) -> StreamError {
        StreamError::recovery_with_code(
            ErrorCode::RECOVERY_ABORTED,
            self.error
                .clone()
                .unwrap_or_else(|| format!("{} recovery failed", self.strategy.as_str())),
        )
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Retry budget per error type
    #[serde(default)]
    pub max_retries: RetryBudget,

    /// First retry delay, doubled on every further attempt
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for the retry delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default = "default_true")]
    pub enable_file_fallback: bool,

    #[serde(default = "default_fallback_file")]
    pub fallback_file: PathBuf,

    #[serde(default = "default_true")]
    pub enable_console_fallback: bool,

    /// Number of classified errors kept for diagnostics
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: RetryBudget::default(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            enable_file_fallback: true,
            fallback_file: default_fallback_file(),
            enable_console_fallback: true,
            history_limit: default_history_limit(),
        }
    }
}

impl RecoveryConfig {
    pub fn max_retries_for(&self, error_type: ErrorType) -> u32 {
        self.max_retries.get(error_type)
    }
}

/// Retries allowed per error type before falling back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub connection: u32,
    pub queue: u32,
    pub synchronization: u32,
    pub output: u32,
    pub configuration: u32,
    pub execution: u32,
    pub resource: u32,
    pub timeout: u32,
    pub unknown: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            connection: 3,
            queue: 2,
            synchronization: 2,
            output: 2,
            configuration: 1,
            execution: 1,
            resource: 2,
            timeout: 2,
            unknown: 1,
        }
    }
}

impl RetryBudget {
    pub fn get(&self, error_type: ErrorType) -> u32 {
        match error_type {
            ErrorType::Connection => self.connection,
            ErrorType::Queue => self.queue,
            ErrorType::Synchronization => self.synchronization,
            ErrorType::Output => self.output,
            ErrorType::Configuration => self.configuration,
            ErrorType::Execution => self.execution,
            ErrorType::Resource => self.resource,
            ErrorType::Timeout => self.timeout,
            ErrorType::Unknown => self.unknown,
        }
    }
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_fallback_file() -> PathBuf {
    PathBuf::from("reporter-stream-fallback.json")
}

fn default_history_limit() -> usize {
    100
}

/// Exponential backoff: `min(base * 2^(attempt-1), max)`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63) as i32;
    let multiplier = 2f64.powi(exponent);
    Duration::try_from_secs_f64(base.as_secs_f64() * multiplier)
        .unwrap_or(max)
        .min(max)
}

/// Classifies failures, runs recovery strategies and keeps statistics
pub struct ErrorHandler {
    config: RecoveryConfig,
    writer: Arc<dyn OutputWriter>,
    stats: RwLock<ErrorStats>,
    history: RwLock<VecDeque<StreamErrorContext>>,
}

impl ErrorHandler {
    pub fn new(config: RecoveryConfig, writer: Arc<dyn OutputWriter>) -> Self {
        Self {
            config,
            writer,
            stats: RwLock::new(ErrorStats::default()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Classify, pick a strategy, execute it and record the outcome
    pub async fn handle_error(&self, error: &StreamError, context: ErrorContext) -> RecoveryResult {
        let classified = self.classify(error, context);
        self.record_error(&classified).await;

        let strategy = self.determine_recovery_strategy(&classified);
        info!(
            error_type = classified.error_type.as_str(),
            severity = classified.severity.as_str(),
            attempt = classified.attempt,
            strategy = strategy.as_str(),
            "Handling stream error: {}",
            classified.error_message
        );

        self.execute_strategy(strategy, &classified).await
    }

    pub fn classify(&self, error: &StreamError, context: ErrorContext) -> StreamErrorContext {
        let (error_type, baseline) = classify_error(error.message(), error.name(), &context);
        let severity = escalate_severity(baseline, &context);
        StreamErrorContext {
            error_type,
            severity,
            attempt: context.attempt,
            context,
            error_message: error.to_string(),
            error_name: error.name().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn determine_recovery_strategy(&self, error: &StreamErrorContext) -> RecoveryStrategy {
        determine_recovery_strategy(error, &self.config)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.config.base_delay, self.config.max_delay, attempt)
    }

    /// Run one strategy against an already classified error.
    ///
    /// Updates the recovery statistics but not the error counts or history,
    /// so synthetic errors raised by the health monitor do not feed back
    /// into the error rate.
    pub async fn execute_strategy(
        &self,
        strategy: RecoveryStrategy,
        error: &StreamErrorContext,
    ) -> RecoveryResult {
        let started = Instant::now();
        let outcome = match strategy {
            RecoveryStrategy::Retry => self.retry(error).await,
            RecoveryStrategy::FallbackFile => self.fallback_to_file(error).await,
            RecoveryStrategy::FallbackConsole => self.fallback_to_console(error).await,
            RecoveryStrategy::Skip => Ok(json!({
                "skipped": true,
                "reason": format!("{} error skipped", error.error_type.as_str()),
            })),
            RecoveryStrategy::Degrade => Ok(json!({
                "degraded": true,
                "reason": format!("{} error degraded output", error.error_type.as_str()),
            })),
            RecoveryStrategy::Abort => Err(format!("recovery aborted: {}", error.error_message)),
        };

        let result = match outcome {
            Ok(output) => RecoveryResult {
                success: true,
                strategy,
                duration: started.elapsed(),
                output: Some(output),
                error: None,
            },
            Err(message) => RecoveryResult {
                success: false,
                strategy,
                duration: started.elapsed(),
                output: None,
                error: Some(message),
            },
        };

        if result.success {
            debug!(strategy = strategy.as_str(), "Recovery succeeded");
        } else {
            warn!(
                strategy = strategy.as_str(),
                error = result.error.as_deref().unwrap_or_default(),
                "Recovery failed"
            );
        }

        self.stats.write().await.record_recovery(&result);
        result
    }

    /// Waits out the backoff; re-submitting is the caller's job
    async fn retry(&self, error: &StreamErrorContext) -> Result<Value, String> {
        let delay = self.retry_delay(error.attempt);
        debug!(
            attempt = error.attempt,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );
        tokio::time::sleep(delay).await;
        Ok(json!({
            "nextAttempt": error.attempt + 1,
            "delayMs": delay.as_millis() as u64,
        }))
    }

    async fn fallback_to_file(&self, error: &StreamErrorContext) -> Result<Value, String> {
        let record = FallbackRecord {
            timestamp: error.timestamp,
            source: error
                .context
                .source
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| error.context.operation.clone()),
            error: FallbackError {
                message: error.error_message.clone(),
                error_type: error.error_type,
                severity: error.severity,
            },
            fallback_reason: format!(
                "{} error on attempt {}",
                error.error_type.as_str(),
                error.attempt
            ),
            original_data: error.context.data.clone(),
        };

        let path = &self.config.fallback_file;
        match fallback::append_record(path, &record).await {
            Ok(records) => Ok(json!({
                "file": path.display().to_string(),
                "records": records,
            })),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Fallback file write failed");
                Err(e.to_string())
            }
        }
    }

    async fn fallback_to_console(&self, error: &StreamErrorContext) -> Result<Value, String> {
        let stream = match error.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => OutputStream::Stderr,
            ErrorSeverity::Normal | ErrorSeverity::Low => OutputStream::Stdout,
        };
        let line = format!(
            "[reporter-stream] {} {} error in {}: {}",
            error.severity.as_str(),
            error.error_type.as_str(),
            error.context.operation,
            error.error_message
        );
        self.writer
            .write_line(stream, &line)
            .await
            .map(|()| json!({ "stream": stream }))
            .map_err(|e| e.to_string())
    }

    async fn record_error(&self, error: &StreamErrorContext) {
        self.stats.write().await.record_error(error);

        let mut history = self.history.write().await;
        history.push_back(error.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    pub async fn stats(&self) -> ErrorStats {
        self.stats.read().await.clone()
    }

    /// Classified errors, oldest first
    pub async fn error_history(&self) -> Vec<StreamErrorContext> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Errors recorded within the last `window`
    pub async fn recent_errors(&self, window: Duration) -> Vec<StreamErrorContext> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        self.history
            .read()
            .await
            .iter()
            .filter(|e| cutoff.map_or(true, |cutoff| e.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = ErrorStats::default();
        self.history.write().await.clear();
    }
}
