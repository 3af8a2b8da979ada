/// Error code registry for reporter-stream
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Queue errors
/// - 3000-3999: Timeout errors
/// - 4000-4999: Output errors
/// - 5000-5999: Execution errors
/// - 6000-6999: Recovery errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_TOML: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;
    pub const CONFIG_NO_RUNTIME: u16 = 1004;

    // Queue errors (2000-2999)
    pub const QUEUE_GENERIC: u16 = 2000;
    pub const QUEUE_SIZE_LIMIT: u16 = 2001;
    pub const QUEUE_CLEARED: u16 = 2002;
    pub const QUEUE_TEST_COMPLETION_TIMEOUT: u16 = 2003;
    pub const QUEUE_OPERATION_DROPPED: u16 = 2004;

    // Timeout errors (3000-3999)
    pub const TIMEOUT_GENERIC: u16 = 3000;
    pub const TIMEOUT_OPERATION: u16 = 3001;
    pub const TIMEOUT_FLUSH: u16 = 3002;

    // Output errors (4000-4999)
    pub const OUTPUT_GENERIC: u16 = 4000;
    pub const OUTPUT_WRITE_FAILED: u16 = 4001;
    pub const OUTPUT_FALLBACK_FILE: u16 = 4002;
    pub const OUTPUT_SERIALIZATION: u16 = 4003;
    pub const OUTPUT_NOT_FOUND: u16 = 4004;
    pub const OUTPUT_PERMISSION_DENIED: u16 = 4005;

    // Execution errors (5000-5999)
    pub const EXEC_GENERIC: u16 = 5000;
    pub const EXEC_PANICKED: u16 = 5001;

    // Recovery errors (6000-6999)
    pub const RECOVERY_GENERIC: u16 = 6000;
    pub const RECOVERY_ABORTED: u16 = 6001;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_INTERNAL: u16 = 9001;
}

/// Get a human-readable description of an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid TOML in configuration file",
        1003 => "Invalid configuration value",
        1004 => "No async runtime available",

        // Queue errors
        2000 => "Generic queue error",
        2001 => "Queue size limit exceeded",
        2002 => "Queue cleared before the operation ran",
        2003 => "Test output did not complete in time",
        2004 => "Operation dropped without a result",

        // Timeout errors
        3000 => "Generic timeout",
        3001 => "Operation exceeded its timeout",
        3002 => "Queue flush exceeded its timeout",

        // Output errors
        4000 => "Generic output error",
        4001 => "Output write failed",
        4002 => "Fallback file could not be written",
        4003 => "Output serialization failed",
        4004 => "Output target not found",
        4005 => "Output permission denied",

        // Execution errors
        5000 => "Generic execution error",
        5001 => "Operation executor panicked",

        // Recovery errors
        6000 => "Generic recovery error",
        6001 => "Recovery aborted",

        // Other errors
        9000 => "Generic error",
        9001 => "Internal error",

        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_ranges() {
        assert!(ErrorCode::CONFIG_GENERIC >= 1000 && ErrorCode::CONFIG_GENERIC < 2000);
        assert!(ErrorCode::QUEUE_GENERIC >= 2000 && ErrorCode::QUEUE_GENERIC < 3000);
        assert!(ErrorCode::TIMEOUT_GENERIC >= 3000 && ErrorCode::TIMEOUT_GENERIC < 4000);
        assert!(ErrorCode::OUTPUT_GENERIC >= 4000 && ErrorCode::OUTPUT_GENERIC < 5000);
        assert!(ErrorCode::EXEC_GENERIC >= 5000 && ErrorCode::EXEC_GENERIC < 6000);
        assert!(ErrorCode::RECOVERY_GENERIC >= 6000 && ErrorCode::RECOVERY_GENERIC < 7000);
        assert!(ErrorCode::OTHER_GENERIC >= 9000 && ErrorCode::OTHER_GENERIC < 10000);
    }

    #[test]
    fn test_error_code_descriptions() {
        assert_eq!(describe_error_code(2001), "Queue size limit exceeded");
        assert_eq!(describe_error_code(3001), "Operation exceeded its timeout");
        assert_eq!(describe_error_code(65535), "Unknown error code");
    }
}
