use super::{DiagnosticsConfig, OperationMetrics, PerformanceSample};
use crate::recovery::{ErrorSeverity, ErrorType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

const ERROR_RATE_WARNING: f64 = 0.1;
const ACTIVE_OPERATIONS_WARNING: usize = 50;

/// Point-in-time diagnostics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub performance: Option<PerformanceSample>,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub active_operations: usize,
    pub errors_by_type: HashMap<ErrorType, usize>,
    pub errors_by_severity: HashMap<ErrorSeverity, usize>,
    pub recommendations: Vec<String>,
}

impl DiagnosticsReport {
    pub(crate) fn build<'a>(
        config: &DiagnosticsConfig,
        history: impl Iterator<Item = &'a OperationMetrics>,
        performance: Option<PerformanceSample>,
        active_operations: usize,
    ) -> Self {
        let mut report = Self {
            generated_at: Utc::now(),
            performance,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            active_operations,
            errors_by_type: HashMap::new(),
            errors_by_severity: HashMap::new(),
            recommendations: Vec::new(),
        };

        for op in history {
            report.total_operations += 1;
            match op.success {
                Some(true) => report.successful_operations += 1,
                Some(false) => report.failed_operations += 1,
                None => {}
            }
            if let Some(error_type) = op.error_type {
                *report.errors_by_type.entry(error_type).or_insert(0) += 1;
            }
            if let Some(severity) = op.severity {
                *report.errors_by_severity.entry(severity).or_insert(0) += 1;
            }
        }

        report.recommendations = report.recommend(config);
        report
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.failed_operations as f64 / self.total_operations as f64
        }
    }

    fn recommend(&self, config: &DiagnosticsConfig) -> Vec<String> {
        let mut recommendations = Vec::new();
        let threshold_ms = config.latency_warning_threshold.as_secs_f64() * 1000.0;

        if let Some(perf) = &self.performance {
            if perf.p95_latency_ms > threshold_ms {
                recommendations.push(format!(
                    "p95 latency {:.1}ms exceeds {:.0}ms; enable batching or reduce output volume",
                    perf.p95_latency_ms, threshold_ms
                ));
            }
            if perf.max_latency_ms > threshold_ms * 10.0 {
                recommendations.push(format!(
                    "slowest operation took {:.1}ms; check for blocking writes",
                    perf.max_latency_ms
                ));
            }
        }

        if self.error_rate() > ERROR_RATE_WARNING {
            recommendations.push(format!(
                "error rate {:.1}% is high; inspect the fallback file and error history",
                self.error_rate() * 100.0
            ));
        }

        let critical = self
            .errors_by_severity
            .get(&ErrorSeverity::Critical)
            .copied()
            .unwrap_or(0);
        if critical > 0 {
            recommendations.push(format!(
                "{critical} critical error(s) aborted output; review critical-priority writers"
            ));
        }

        if let Some((error_type, count)) = self
            .errors_by_type
            .iter()
            .max_by_key(|(error_type, count)| (**count, std::cmp::Reverse(**error_type)))
        {
            if *count > 1 {
                recommendations.push(format!(
                    "most frequent error type is {} ({count} occurrences)",
                    error_type.as_str()
                ));
            }
        }

        if self.active_operations > ACTIVE_OPERATIONS_WARNING {
            recommendations.push(format!(
                "{} operations still in flight; the output queue may be stalled",
                self.active_operations
            ));
        }

        if self.total_operations >= config.max_history {
            recommendations.push(
                "operation history is at capacity; older operations are no longer reported"
                    .to_string(),
            );
        }

        recommendations
    }

    /// Human readable rendering for logs
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Stream diagnostics ({})", self.generated_at.to_rfc3339());
        let _ = writeln!(
            out,
            "  operations: {} total, {} ok, {} failed, {} active",
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.active_operations
        );

        if let Some(perf) = &self.performance {
            let _ = writeln!(
                out,
                "  latency: avg {:.1}ms, p95 {:.1}ms, p99 {:.1}ms, max {:.1}ms",
                perf.average_latency_ms, perf.p95_latency_ms, perf.p99_latency_ms, perf.max_latency_ms
            );
            let _ = writeln!(out, "  throughput: {:.2} ops/s", perf.throughput);
        }

        if !self.errors_by_type.is_empty() {
            let mut types: Vec<_> = self.errors_by_type.iter().collect();
            types.sort();
            let breakdown: Vec<String> = types
                .into_iter()
                .map(|(t, n)| format!("{}={}", t.as_str(), n))
                .collect();
            let _ = writeln!(out, "  errors: {}", breakdown.join(", "));
        }

        if self.recommendations.is_empty() {
            let _ = writeln!(out, "  no issues detected");
        } else {
            for recommendation in &self.recommendations {
                let _ = writeln!(out, "  - {recommendation}");
            }
        }
        out
    }
}
