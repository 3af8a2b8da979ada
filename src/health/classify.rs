//! Pure health classification and failure-mode detection

use super::{FailureMode, HealthConfig, HealthStatus, PerformanceSnapshot};
use crate::recovery::ErrorType;

const FAILED_RATIO: f64 = 2.0;
const UNHEALTHY_RATIO: f64 = 1.0;
const DEGRADED_RATIO: f64 = 0.7;
const UNHEALTHY_ERROR_RATE: f64 = 0.5;
const DEGRADED_ERROR_RATE: f64 = 0.2;

fn ratio(value: f64, threshold: f64) -> f64 {
    if threshold > 0.0 {
        value / threshold
    } else {
        0.0
    }
}

/// Largest metric-to-threshold ratio across latency, queue size and memory
pub fn worst_ratio(metrics: &PerformanceSnapshot, config: &HealthConfig) -> f64 {
    [
        ratio(metrics.latency_ms, config.max_latency_ms as f64),
        ratio(metrics.queue_size as f64, config.max_queue_size as f64),
        ratio(metrics.memory_mb, config.max_memory_mb as f64),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Classify one sample. An open breaker wins over every metric.
pub fn classify_health(
    metrics: &PerformanceSnapshot,
    config: &HealthConfig,
    breaker_open: bool,
) -> HealthStatus {
    let worst = worst_ratio(metrics, config);

    if breaker_open || worst >= FAILED_RATIO {
        HealthStatus::Failed
    } else if worst >= UNHEALTHY_RATIO || metrics.error_rate > UNHEALTHY_ERROR_RATE {
        HealthStatus::Unhealthy
    } else if worst >= DEGRADED_RATIO || metrics.error_rate > DEGRADED_ERROR_RATE {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Guess why health went bad from the current sample
pub fn detect_failure_mode(
    metrics: &PerformanceSnapshot,
    config: &HealthConfig,
    breaker_open: bool,
) -> FailureMode {
    let latency = ratio(metrics.latency_ms, config.max_latency_ms as f64);
    let queue = ratio(metrics.queue_size as f64, config.max_queue_size as f64);
    let memory = ratio(metrics.memory_mb, config.max_memory_mb as f64);

    if metrics.error_rate > UNHEALTHY_ERROR_RATE
        && metrics.dominant_error_type == Some(ErrorType::Configuration)
    {
        FailureMode::ConfigurationError
    } else if breaker_open && metrics.error_rate > UNHEALTHY_ERROR_RATE {
        FailureMode::ConnectionLoss
    } else if queue >= UNHEALTHY_RATIO {
        FailureMode::QueueOverflow
    } else if metrics.queue_size > 0 && metrics.throughput == 0.0 && latency >= UNHEALTHY_RATIO {
        FailureMode::Deadlock
    } else if memory >= UNHEALTHY_RATIO {
        FailureMode::ResourceExhaustion
    } else if latency >= UNHEALTHY_RATIO {
        FailureMode::Performance
    } else {
        FailureMode::ExternalFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            max_latency_ms: 100,
            max_queue_size: 50,
            max_memory_mb: 256,
            ..Default::default()
        }
    }

    fn latency(ms: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            latency_ms: ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_latency_thresholds() {
        let config = config();
        assert_eq!(classify_health(&latency(200.0), &config, false), HealthStatus::Failed);
        assert_eq!(classify_health(&latency(150.0), &config, false), HealthStatus::Unhealthy);
        assert_eq!(classify_health(&latency(80.0), &config, false), HealthStatus::Degraded);
        assert_eq!(classify_health(&latency(50.0), &config, false), HealthStatus::Healthy);
    }

    #[test]
    fn test_any_metric_counts() {
        let config = config();
        let queue = PerformanceSnapshot {
            queue_size: 100,
            ..Default::default()
        };
        assert_eq!(classify_health(&queue, &config, false), HealthStatus::Failed);

        let memory = PerformanceSnapshot {
            memory_mb: 200.0,
            ..Default::default()
        };
        assert_eq!(classify_health(&memory, &config, false), HealthStatus::Degraded);
    }

    #[test]
    fn test_error_rate_thresholds() {
        let config = config();
        let rate = |error_rate| PerformanceSnapshot {
            error_rate,
            ..Default::default()
        };
        assert_eq!(classify_health(&rate(0.6), &config, false), HealthStatus::Unhealthy);
        assert_eq!(classify_health(&rate(0.5), &config, false), HealthStatus::Degraded);
        assert_eq!(classify_health(&rate(0.2), &config, false), HealthStatus::Healthy);
    }

    #[test]
    fn test_open_breaker_is_failed() {
        assert_eq!(
            classify_health(&PerformanceSnapshot::default(), &config(), true),
            HealthStatus::Failed
        );
    }

    #[test]
    fn test_failure_modes() {
        let config = config();
        let overflow = PerformanceSnapshot {
            queue_size: 60,
            ..Default::default()
        };
        assert_eq!(detect_failure_mode(&overflow, &config, false), FailureMode::QueueOverflow);

        let stuck = PerformanceSnapshot {
            latency_ms: 150.0,
            queue_size: 10,
            throughput: 0.0,
            ..Default::default()
        };
        assert_eq!(detect_failure_mode(&stuck, &config, false), FailureMode::Deadlock);

        let slow = PerformanceSnapshot {
            latency_ms: 150.0,
            throughput: 4.0,
            ..Default::default()
        };
        assert_eq!(detect_failure_mode(&slow, &config, false), FailureMode::Performance);

        let memory = PerformanceSnapshot {
            memory_mb: 300.0,
            ..Default::default()
        };
        assert_eq!(
            detect_failure_mode(&memory, &config, false),
            FailureMode::ResourceExhaustion
        );

        let erroring = PerformanceSnapshot {
            error_rate: 0.9,
            ..Default::default()
        };
        assert_eq!(detect_failure_mode(&erroring, &config, true), FailureMode::ConnectionLoss);
        assert_eq!(detect_failure_mode(&erroring, &config, false), FailureMode::ExternalFailure);
    }

    #[test]
    fn test_configuration_errors_dominating_the_error_rate() {
        let config = config();
        let misconfigured = PerformanceSnapshot {
            error_rate: 0.8,
            dominant_error_type: Some(ErrorType::Configuration),
            ..Default::default()
        };
        assert_eq!(
            detect_failure_mode(&misconfigured, &config, false),
            FailureMode::ConfigurationError
        );
        assert_eq!(
            detect_failure_mode(&misconfigured, &config, true),
            FailureMode::ConfigurationError
        );

        // A few stray configuration errors are not enough.
        let occasional = PerformanceSnapshot {
            error_rate: 0.3,
            ..misconfigured
        };
        assert_eq!(
            detect_failure_mode(&occasional, &config, false),
            FailureMode::ExternalFailure
        );
    }
}
