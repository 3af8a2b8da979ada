//! Common test utilities and helpers

#![allow(dead_code)]

use reporter_stream::config::StreamConfig;
use reporter_stream::queue::{OperationRequest, OutputSource, Priority};
use reporter_stream::testing::{MockEnvironment, MockOutputWriter, MockSystemProbe};
use reporter_stream::ReporterStreamIntegration;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Shared log of executor labels, in completion order
pub type CompletionLog = Arc<Mutex<Vec<String>>>;

/// Operation that records its label once it has run
pub fn labelled_operation(
    log: &CompletionLog,
    priority: Priority,
    label: &str,
    delay: Duration,
) -> OperationRequest {
    let log = Arc::clone(log);
    let label = label.to_string();
    OperationRequest::new(priority, OutputSource::Test, label.clone(), move || async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        log.lock().unwrap().push(label);
        Ok(())
    })
}

/// Integration wired to in-memory collaborators
pub struct TestStream {
    pub stream: ReporterStreamIntegration,
    pub writer: MockOutputWriter,
    pub probe: Arc<MockSystemProbe>,
    pub temp_dir: TempDir,
}

impl TestStream {
    pub fn new(env: MockEnvironment, configure: impl FnOnce(&mut StreamConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = StreamConfig::builder()
            .fallback_file(temp_dir.path().join("fallback.json"))
            .auto_recovery(false)
            .build()
            .unwrap();
        configure(&mut config);

        let writer = MockOutputWriter::new();
        let probe = Arc::new(MockSystemProbe::new());
        let stream = ReporterStreamIntegration::with_collaborators(
            config,
            Arc::new(writer.clone()),
            Arc::new(env),
            probe.clone(),
        );

        Self {
            stream,
            writer,
            probe,
            temp_dir,
        }
    }

    pub fn interactive() -> Self {
        Self::new(MockEnvironment::interactive(), |_| {})
    }

    pub fn fallback_file(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("fallback.json")
    }
}
