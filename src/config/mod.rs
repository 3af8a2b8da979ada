//! Stream configuration
//!
//! [`StreamConfig`] aggregates the per-component configs. Every field has a
//! default resolved at construction, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! [queue]
//! max_size = 200
//! batch_timeout = "50ms"
//!
//! [health.circuit_breaker]
//! failure_threshold = 3
//! ```

pub mod builder;

pub use builder::StreamConfigBuilder;

use crate::diagnostics::DiagnosticsConfig;
use crate::error::{ErrorCode, ErrorExt, Result, StreamError};
use crate::health::HealthConfig;
use crate::integration::{EnvironmentProbe, IntegrationConfig};
use crate::queue::QueueConfig;
use crate::recovery::RecoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment overrides, e.g. `REPORTER_STREAM_FORCE_DEGRADED=1`
pub const ENV_PREFIX: &str = "REPORTER_STREAM_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::new()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            StreamError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("cannot read config file {}", path.display()),
            )
            .with_source(e)
        })?;
        debug!(path = %path.display(), "Loaded stream config");
        Self::from_toml_str(&contents).map_err(|e| e.with_context(path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).to_config_error("cannot serialize config")
    }

    /// Apply `REPORTER_STREAM_*` overrides on top of the loaded values
    pub fn merge_env(&mut self, env: &dyn EnvironmentProbe) -> Result<()> {
        if let Some(value) = env.var(&format!("{ENV_PREFIX}FORCE_DEGRADED")) {
            self.integration.force_degraded = parse_flag("FORCE_DEGRADED", &value)?;
        }
        if let Some(value) = env.var(&format!("{ENV_PREFIX}MAX_QUEUE_SIZE")) {
            self.queue.max_size = value.trim().parse().map_err(|_| {
                invalid_value(format!("{ENV_PREFIX}MAX_QUEUE_SIZE must be a number, got '{value}'"))
            })?;
        }
        if let Some(value) = env.var(&format!("{ENV_PREFIX}FALLBACK_FILE")) {
            self.recovery.fallback_file = PathBuf::from(value);
        }
        self.validate()
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str); 8] = [
            (self.queue.max_size == 0, "queue.max_size must be greater than 0"),
            (
                self.queue.enable_batching && self.queue.max_batch_size == 0,
                "queue.max_batch_size must be greater than 0 when batching is enabled",
            ),
            (
                self.queue.default_timeout.is_zero(),
                "queue.default_timeout must be greater than 0",
            ),
            (
                self.recovery.base_delay > self.recovery.max_delay,
                "recovery.base_delay must not exceed recovery.max_delay",
            ),
            (
                self.health.max_latency_ms == 0
                    || self.health.max_queue_size == 0
                    || self.health.max_memory_mb == 0,
                "health thresholds must be greater than 0",
            ),
            (
                self.health.circuit_breaker.failure_threshold == 0,
                "health.circuit_breaker.failure_threshold must be greater than 0",
            ),
            (
                self.health.check_interval.is_zero() || self.diagnostics.sampling_interval.is_zero(),
                "check and sampling intervals must be greater than 0",
            ),
            (
                self.diagnostics.max_history == 0 || self.diagnostics.sample_size == 0,
                "diagnostics.max_history and diagnostics.sample_size must be greater than 0",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(invalid_value(*message)),
            None => Ok(()),
        }
    }
}

fn invalid_value(message: impl Into<String>) -> StreamError {
    StreamError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, message)
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(invalid_value(format!(
            "{ENV_PREFIX}{name} must be a boolean, got '{other}'"
        ))),
    }
}
