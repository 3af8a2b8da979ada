use super::{ErrorCode, StreamError};

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert to StreamError with specific error type
    fn to_config_error(self, message: impl Into<String>) -> Result<T, StreamError>;
    fn to_output_error(self, message: impl Into<String>) -> Result<T, StreamError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_config_error(self, message: impl Into<String>) -> Result<T, StreamError> {
        self.map_err(|e| StreamError::config(message).with_source(e))
    }

    fn to_output_error(self, message: impl Into<String>) -> Result<T, StreamError> {
        self.map_err(|e| {
            StreamError::output_with_code(ErrorCode::OUTPUT_WRITE_FAILED, message).with_source(e)
        })
    }
}
