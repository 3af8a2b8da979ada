use super::{ErrorSeverity, ErrorType, RecoveryResult, RecoveryStrategy, StreamErrorContext};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Running error and recovery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub errors_by_type: HashMap<ErrorType, u64>,
    pub errors_by_severity: HashMap<ErrorSeverity, u64>,
    pub strategies_used: HashMap<RecoveryStrategy, u64>,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub average_recovery_time_ms: f64,
}

impl ErrorStats {
    pub(crate) fn record_error(&mut self, error: &StreamErrorContext) {
        self.total_errors += 1;
        *self.errors_by_type.entry(error.error_type).or_insert(0) += 1;
        *self.errors_by_severity.entry(error.severity).or_insert(0) += 1;
    }

    pub(crate) fn record_recovery(&mut self, result: &RecoveryResult) {
        *self.strategies_used.entry(result.strategy).or_insert(0) += 1;
        if result.success {
            self.successful_recoveries += 1;
        } else {
            self.failed_recoveries += 1;
        }

        let n = self.total_recoveries() as f64;
        let elapsed_ms = result.duration.as_secs_f64() * 1000.0;
        self.average_recovery_time_ms += (elapsed_ms - self.average_recovery_time_ms) / n;
    }

    pub fn total_recoveries(&self) -> u64 {
        self.successful_recoveries + self.failed_recoveries
    }

    /// Fraction of recoveries that succeeded, 1.0 when none ran
    pub fn recovery_rate(&self) -> f64 {
        match self.total_recoveries() {
            0 => 1.0,
            total => self.successful_recoveries as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(success: bool, ms: u64) -> RecoveryResult {
        RecoveryResult {
            success,
            strategy: RecoveryStrategy::Skip,
            duration: Duration::from_millis(ms),
            output: None,
            error: None,
        }
    }

    #[test]
    fn test_running_mean() {
        let mut stats = ErrorStats::default();
        stats.record_recovery(&result(true, 10));
        stats.record_recovery(&result(false, 30));
        stats.record_recovery(&result(true, 20));

        assert!((stats.average_recovery_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(stats.successful_recoveries, 2);
        assert_eq!(stats.failed_recoveries, 1);
        assert_eq!(stats.strategies_used[&RecoveryStrategy::Skip], 3);
        assert!((stats.recovery_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
