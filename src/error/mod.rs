use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::ErrorExt;

/// The unified error type for the streaming output subsystem
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Queue error: {message}")]
    Queue {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Timeout: {message}")]
    Timeout {
        code: u16,
        message: String,
        operation_id: Option<Uuid>,
        timeout: Duration,
    },

    #[error("[E{code:04}] Output error: {message}")]
    Output {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Recovery error: {message}")]
    Recovery {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StreamError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a queue error with specific code
    pub fn queue_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Queue {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Rejection raised when the queue already holds `max_size` operations
    pub fn queue_full(max_size: usize) -> Self {
        Self::queue_with_code(
            ErrorCode::QUEUE_SIZE_LIMIT,
            format!("queue size limit exceeded (max {})", max_size),
        )
    }

    /// Rejection delivered to every pending operation by `clear()`
    pub fn queue_cleared() -> Self {
        Self::queue_with_code(ErrorCode::QUEUE_CLEARED, "queue cleared")
    }

    /// A per-operation timeout fired before the executor finished
    pub fn operation_timeout(operation_id: Uuid, timeout: Duration) -> Self {
        Self::Timeout {
            code: ErrorCode::TIMEOUT_OPERATION,
            message: format!(
                "operation {} timeout after {}ms",
                operation_id,
                timeout.as_millis()
            ),
            operation_id: Some(operation_id),
            timeout,
        }
    }

    /// Create a timeout error with specific code
    pub fn timeout_with_code(code: u16, message: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            code,
            message: message.into(),
            operation_id: None,
            timeout,
        }
    }

    /// Create an output error with default code
    pub fn output(message: impl Into<String>) -> Self {
        Self::output_with_code(ErrorCode::OUTPUT_GENERIC, message)
    }

    /// Create an output error with specific code
    pub fn output_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Output {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an execution error with default code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::execution_with_code(ErrorCode::EXEC_GENERIC, message)
    }

    /// Create an execution error with specific code
    pub fn execution_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a recovery error with specific code
    pub fn recovery_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Recovery {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    ///
    /// Timeouts carry no source and are returned unchanged.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Queue { source: src, .. }
            | Self::Output { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Recovery { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Timeout { .. } => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        let message = self.message_mut();
        *message = format!("{}: {}", message, context);
        self
    }

    fn message_mut(&mut self) -> &mut String {
        match self {
            Self::Config { message, .. }
            | Self::Queue { message, .. }
            | Self::Timeout { message, .. }
            | Self::Output { message, .. }
            | Self::Execution { message, .. }
            | Self::Recovery { message, .. }
            | Self::Other { message, .. } => message,
        }
    }

    /// The bare message, without the code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Config { message, .. }
            | Self::Queue { message, .. }
            | Self::Timeout { message, .. }
            | Self::Output { message, .. }
            | Self::Execution { message, .. }
            | Self::Recovery { message, .. }
            | Self::Other { message, .. } => message,
        }
    }

    /// Short error name, matched by the classifier alongside the message
    pub fn name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Queue { .. } => "QueueError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Output { .. } => "OutputError",
            Self::Execution { .. } => "ExecutionError",
            Self::Recovery { .. } => "RecoveryError",
            Self::Other { .. } => "Error",
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Queue { code, .. }
            | Self::Timeout { code, .. }
            | Self::Output { code, .. }
            | Self::Execution { code, .. }
            | Self::Recovery { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Queue { .. } => 3,
            Self::Timeout { .. } => 4,
            Self::Output { .. } => 5,
            Self::Execution { .. } => 6,
            Self::Recovery { .. } => 7,
            Self::Other { .. } => 1,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check whether this is the size-limit rejection
    pub fn is_queue_full(&self) -> bool {
        self.code() == ErrorCode::QUEUE_SIZE_LIMIT
    }
}

/// Type alias for Results using StreamError
pub type Result<T> = std::result::Result<T, StreamError>;

// Conversion from common error types

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::NotFound => (ErrorCode::OUTPUT_NOT_FOUND, "output target not found (ENOENT)"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::OUTPUT_PERMISSION_DENIED, "output permission denied")
            }
            ErrorKind::TimedOut => {
                return StreamError::timeout_with_code(
                    ErrorCode::TIMEOUT_GENERIC,
                    format!("io timeout: {}", err),
                    Duration::ZERO,
                )
            }
            ErrorKind::BrokenPipe => (ErrorCode::OUTPUT_WRITE_FAILED, "write failed: broken pipe"),
            _ => (ErrorCode::OUTPUT_WRITE_FAILED, "write failed"),
        };

        StreamError::output_with_code(code, message).with_source(err)
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::output_with_code(ErrorCode::OUTPUT_SERIALIZATION, "invalid JSON output")
            .with_source(err)
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(err: toml::de::Error) -> Self {
        StreamError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, "invalid TOML syntax")
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_message() {
        let err = StreamError::queue_full(2);
        assert!(err.to_string().contains("queue size limit exceeded"));
        assert!(err.to_string().contains("[E2001]"));
        assert!(err.is_queue_full());
        assert_eq!(err.name(), "QueueError");
    }

    #[test]
    fn test_timeout_names_itself() {
        let id = Uuid::new_v4();
        let err = StreamError::operation_timeout(id, Duration::from_millis(50));
        assert!(err.is_timeout());
        assert!(err.message().contains("timeout"));
        assert_eq!(err.code(), ErrorCode::TIMEOUT_OPERATION);
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_error_creation_and_chaining() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = StreamError::output("Cannot write record")
            .with_source(io_err)
            .with_context("while streaming test output");

        assert_eq!(err.code(), ErrorCode::OUTPUT_GENERIC);
        assert!(err
            .message()
            .ends_with("Cannot write record: while streaming test output"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_not_found_maps_to_enoent() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = StreamError::from(io_err);
        assert_eq!(err.code(), ErrorCode::OUTPUT_NOT_FOUND);
        assert!(err.message().contains("ENOENT"));
    }
}
