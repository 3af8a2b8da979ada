//! JSON fallback file for output that could not be streamed
//!
//! Each append reads the whole file, pushes one record and rewrites it. There
//! is no locking: two concurrent appends can lose one of the records.

use super::{ErrorSeverity, ErrorType};
use crate::error::{ErrorCode, ErrorExt, Result, StreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub error: FallbackError,
    pub fallback_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
}

/// Append one record, returning the number of records now in the file
pub async fn append_record(path: &Path, record: &FallbackRecord) -> Result<usize> {
    let mut records = match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Vec<Value>>(&contents) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Fallback file unreadable, starting fresh");
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Fallback file unreadable, starting fresh");
            Vec::new()
        }
    };

    records.push(serde_json::to_value(record)?);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .to_output_error(format!("cannot create directory {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(&records)?;
    tokio::fs::write(path, contents).await.map_err(|e| {
        StreamError::output_with_code(
            ErrorCode::OUTPUT_FALLBACK_FILE,
            format!("cannot write fallback file {}", path.display()),
        )
        .with_source(e)
    })?;

    debug!(path = %path.display(), records = records.len(), "Appended fallback record");
    Ok(records.len())
}

/// Read every record currently stored in the fallback file
pub async fn read_records(path: &Path) -> Result<Vec<FallbackRecord>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .to_output_error(format!("cannot read fallback file {}", path.display()))?;
    Ok(serde_json::from_str(&contents)?)
}
