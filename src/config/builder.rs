use super::StreamConfig;
use crate::diagnostics::DiagnosticsConfig;
use crate::error::Result;
use crate::health::HealthConfig;
use crate::integration::IntegrationConfig;
use crate::queue::QueueConfig;
use crate::recovery::RecoveryConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Programmatic overrides on top of the defaults
///
/// ```
/// use reporter_stream::config::StreamConfig;
/// use std::time::Duration;
///
/// let config = StreamConfig::builder()
///     .max_queue_size(200)
///     .batching(false)
///     .operation_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.queue.max_size, 200);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.config.recovery = recovery;
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    pub fn diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.config.diagnostics = diagnostics;
        self
    }

    pub fn integration(mut self, integration: IntegrationConfig) -> Self {
        self.config.integration = integration;
        self
    }

    pub fn max_queue_size(mut self, max_size: usize) -> Self {
        self.config.queue.max_size = max_size;
        self
    }

    pub fn batching(mut self, enabled: bool) -> Self {
        self.config.queue.enable_batching = enabled;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue.default_timeout = timeout;
        self
    }

    pub fn fallback_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.recovery.fallback_file = path.into();
        self
    }

    pub fn force_degraded(mut self, degraded: bool) -> Self {
        self.config.integration.force_degraded = degraded;
        self
    }

    pub fn graceful_degradation(mut self, enabled: bool) -> Self {
        self.config.integration.graceful_degradation = enabled;
        self
    }

    pub fn auto_recovery(mut self, enabled: bool) -> Self {
        self.config.health.enable_auto_recovery = enabled;
        self
    }

    pub fn build(self) -> Result<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
