use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Unhealthy observations before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time since the last failure before a healthy observation may close it
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout: default_timeout(),
        }
    }
}

/// Serializable view of the breaker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BreakerInner {
    open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Latch that forces FAILED health after repeated unhealthy observations
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Count one unhealthy observation. Returns true when this call opened the breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        if !inner.open && inner.failure_count >= self.config.failure_threshold {
            inner.open = true;
            warn!(
                failure_count = inner.failure_count,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Count one healthy observation. Returns true when this call closed the breaker.
    ///
    /// An open breaker only closes once the timeout has elapsed since the last
    /// failure. A closed one keeps its count, so failures need not be
    /// consecutive to reach the threshold.
    pub fn record_healthy(&self) -> bool {
        let mut inner = self.lock();
        if !inner.open {
            return false;
        }

        let cooled_down = inner
            .last_failure
            .map_or(true, |at| at.elapsed() > self.config.timeout);
        if cooled_down {
            *inner = BreakerInner::default();
            info!("Circuit breaker closed");
            return true;
        }
        false
    }

    pub fn reset(&self) {
        *self.lock() = BreakerInner::default();
    }

    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            is_open: inner.open,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure_at,
        }
    }
}
