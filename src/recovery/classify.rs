//! Pure classification and strategy selection

use super::{ErrorContext, ErrorSeverity, ErrorType, RecoveryConfig, RecoveryStrategy, StreamErrorContext};
use crate::queue::Priority;

/// Map an error's message and name to a type and baseline severity.
///
/// Checks run in order and the first match wins, so a message mentioning
/// both a timeout and a connection is a timeout.
pub fn classify_error(message: &str, name: &str, context: &ErrorContext) -> (ErrorType, ErrorSeverity) {
    let haystack = format!("{} {}", message, name).to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| haystack.contains(needle));

    if contains_any(&["timeout", "timed out"]) {
        (ErrorType::Timeout, ErrorSeverity::Normal)
    } else if contains_any(&["connection", "network", "econnrefused", "econnreset"]) {
        (ErrorType::Connection, ErrorSeverity::High)
    } else if contains_any(&["queue", "limit"]) {
        (ErrorType::Queue, ErrorSeverity::Normal)
    } else if contains_any(&["lock", "deadlock", "synchroniz"]) {
        (ErrorType::Synchronization, ErrorSeverity::High)
    } else if contains_any(&["write", "file", "output", "enoent"]) {
        (ErrorType::Output, ErrorSeverity::Normal)
    } else if contains_any(&["config", "invalid"]) {
        (ErrorType::Configuration, ErrorSeverity::High)
    } else if contains_any(&["memory", "resource", "rangeerror"]) {
        (ErrorType::Resource, ErrorSeverity::High)
    } else if context.operation.to_lowercase().contains("test") {
        (ErrorType::Execution, ErrorSeverity::Low)
    } else {
        (ErrorType::Unknown, ErrorSeverity::Normal)
    }
}

/// Raise the baseline severity for the context the error happened in
pub fn escalate_severity(severity: ErrorSeverity, context: &ErrorContext) -> ErrorSeverity {
    if context.priority == Some(Priority::Critical) {
        ErrorSeverity::Critical
    } else if context.attempt > 1 && severity == ErrorSeverity::Normal {
        ErrorSeverity::High
    } else {
        severity
    }
}

/// Pick the recovery strategy for a classified error.
///
/// Critical severity aborts regardless of the remaining retry budget.
pub fn determine_recovery_strategy(
    error: &StreamErrorContext,
    config: &RecoveryConfig,
) -> RecoveryStrategy {
    if error.severity == ErrorSeverity::Critical {
        return RecoveryStrategy::Abort;
    }

    let attempt = error.attempt;
    if attempt <= config.max_retries_for(error.error_type) {
        return match error.error_type {
            ErrorType::Connection | ErrorType::Timeout | ErrorType::Resource => {
                RecoveryStrategy::Retry
            }
            ErrorType::Queue | ErrorType::Synchronization => {
                if attempt <= 1 {
                    RecoveryStrategy::Retry
                } else {
                    RecoveryStrategy::Degrade
                }
            }
            ErrorType::Output => {
                if config.enable_file_fallback {
                    RecoveryStrategy::FallbackFile
                } else {
                    RecoveryStrategy::Retry
                }
            }
            ErrorType::Execution => RecoveryStrategy::Skip,
            ErrorType::Configuration | ErrorType::Unknown => RecoveryStrategy::Retry,
        };
    }

    if config.enable_file_fallback && error.error_type != ErrorType::Output {
        RecoveryStrategy::FallbackFile
    } else if config.enable_console_fallback {
        RecoveryStrategy::FallbackConsole
    } else if error.severity == ErrorSeverity::High {
        RecoveryStrategy::Abort
    } else {
        RecoveryStrategy::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> ErrorContext {
        ErrorContext::new("stream_output")
    }

    fn classified(error_type: ErrorType, severity: ErrorSeverity, attempt: u32) -> StreamErrorContext {
        StreamErrorContext {
            error_type,
            severity,
            context: ctx().with_attempt(attempt),
            error_message: String::new(),
            error_name: String::new(),
            timestamp: Utc::now(),
            attempt,
        }
    }

    #[test]
    fn test_timeout_takes_precedence_over_connection() {
        let (error_type, _) = classify_error("connection timeout while writing", "Error", &ctx());
        assert_eq!(error_type, ErrorType::Timeout);
    }

    #[test]
    fn test_classification_order() {
        let cases = [
            ("ECONNREFUSED 127.0.0.1", ErrorType::Connection),
            ("queue size limit exceeded", ErrorType::Queue),
            ("possible deadlock detected", ErrorType::Synchronization),
            ("ENOENT: no such file", ErrorType::Output),
            ("invalid reporter option", ErrorType::Configuration),
            ("out of memory", ErrorType::Resource),
            ("something odd", ErrorType::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_error(message, "Error", &ctx()).0, expected, "{message}");
        }
        assert_eq!(
            classify_error("Maximum call stack", "RangeError", &ctx()).0,
            ErrorType::Resource
        );
    }

    #[test]
    fn test_test_operations_classify_as_execution() {
        let context = ErrorContext::new("stream_test_result");
        let (error_type, severity) = classify_error("assertion exploded", "Error", &context);
        assert_eq!(error_type, ErrorType::Execution);
        assert_eq!(severity, ErrorSeverity::Low);
    }

    #[test]
    fn test_severity_escalation() {
        let critical = ctx().with_priority(Priority::Critical);
        assert_eq!(
            escalate_severity(ErrorSeverity::Low, &critical),
            ErrorSeverity::Critical
        );

        let repeated = ctx().with_attempt(2);
        assert_eq!(
            escalate_severity(ErrorSeverity::Normal, &repeated),
            ErrorSeverity::High
        );
        assert_eq!(escalate_severity(ErrorSeverity::Low, &repeated), ErrorSeverity::Low);
        assert_eq!(
            escalate_severity(ErrorSeverity::Normal, &ctx()),
            ErrorSeverity::Normal
        );
    }

    #[test]
    fn test_critical_always_aborts() {
        let config = RecoveryConfig::default();
        for error_type in ErrorType::ALL {
            for attempt in 0..10 {
                let error = classified(error_type, ErrorSeverity::Critical, attempt);
                assert_eq!(
                    determine_recovery_strategy(&error, &config),
                    RecoveryStrategy::Abort
                );
            }
        }
    }

    #[test]
    fn test_type_specific_strategies_within_budget() {
        let config = RecoveryConfig::default();
        let pick = |error_type, attempt| {
            determine_recovery_strategy(&classified(error_type, ErrorSeverity::Normal, attempt), &config)
        };

        assert_eq!(pick(ErrorType::Connection, 1), RecoveryStrategy::Retry);
        assert_eq!(pick(ErrorType::Timeout, 1), RecoveryStrategy::Retry);
        assert_eq!(pick(ErrorType::Resource, 1), RecoveryStrategy::Retry);
        assert_eq!(pick(ErrorType::Queue, 1), RecoveryStrategy::Retry);
        assert_eq!(pick(ErrorType::Queue, 2), RecoveryStrategy::Degrade);
        assert_eq!(pick(ErrorType::Synchronization, 2), RecoveryStrategy::Degrade);
        assert_eq!(pick(ErrorType::Output, 1), RecoveryStrategy::FallbackFile);
        assert_eq!(pick(ErrorType::Execution, 1), RecoveryStrategy::Skip);
        assert_eq!(pick(ErrorType::Unknown, 1), RecoveryStrategy::Retry);
    }

    #[test]
    fn test_output_retries_without_file_fallback() {
        let config = RecoveryConfig {
            enable_file_fallback: false,
            ..Default::default()
        };
        let error = classified(ErrorType::Output, ErrorSeverity::Normal, 1);
        assert_eq!(
            determine_recovery_strategy(&error, &config),
            RecoveryStrategy::Retry
        );
    }

    #[test]
    fn test_exhausted_retries_fall_back() {
        let config = RecoveryConfig::default();
        let exhausted = config.max_retries_for(ErrorType::Connection) + 1;

        let error = classified(ErrorType::Connection, ErrorSeverity::High, exhausted);
        assert_eq!(
            determine_recovery_strategy(&error, &config),
            RecoveryStrategy::FallbackFile
        );

        // Output errors never fall back to the file they failed to write.
        let exhausted = config.max_retries_for(ErrorType::Output) + 1;
        let error = classified(ErrorType::Output, ErrorSeverity::Normal, exhausted);
        assert_eq!(
            determine_recovery_strategy(&error, &config),
            RecoveryStrategy::FallbackConsole
        );

        let no_fallbacks = RecoveryConfig {
            enable_file_fallback: false,
            enable_console_fallback: false,
            ..Default::default()
        };
        let high = classified(ErrorType::Connection, ErrorSeverity::High, 99);
        assert_eq!(
            determine_recovery_strategy(&high, &no_fallbacks),
            RecoveryStrategy::Abort
        );
        let normal = classified(ErrorType::Unknown, ErrorSeverity::Normal, 99);
        assert_eq!(
            determine_recovery_strategy(&normal, &no_fallbacks),
            RecoveryStrategy::Skip
        );
    }
}
