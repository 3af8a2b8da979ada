//! Output sink abstraction
//!
//! The actual terminal I/O is owned by an external writer; everything in this
//! crate reaches it through [`OutputWriter`] so tests can capture or fail it.

use crate::error::{ErrorExt, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Target stream for one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

#[async_trait]
pub trait OutputWriter: Send + Sync {
    /// Write `text` followed by a newline
    async fn write_line(&self, stream: OutputStream, text: &str) -> Result<()>;
}

/// Writes straight to the process stdout/stderr
#[derive(Debug, Clone, Default)]
pub struct StdioWriter;

#[async_trait]
impl OutputWriter for StdioWriter {
    async fn write_line(&self, stream: OutputStream, text: &str) -> Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        match stream {
            OutputStream::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(line.as_bytes())
                    .await
                    .to_output_error("write to stdout failed")?;
                out.flush().await.to_output_error("flush of stdout failed")
            }
            OutputStream::Stderr => {
                let mut err = tokio::io::stderr();
                err.write_all(line.as_bytes())
                    .await
                    .to_output_error("write to stderr failed")?;
                err.flush().await.to_output_error("flush of stderr failed")
            }
        }
    }
}
