//! Per-test grouping on top of the priority queue

use super::{
    CompletionHandle, OperationOptions, OperationRequest, OperationResult, OutputSource,
    PriorityOutputQueue, Priority, QueueConfig, QueueStats,
};
use crate::error::{ErrorCode, Result, StreamError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Key identifying one test: (file, name)
pub type TestKey = (String, String);

/// Priority queue that tracks which tests still have output in flight
#[derive(Clone)]
pub struct TestOutputQueue {
    queue: PriorityOutputQueue,
    active_tests: Arc<Mutex<HashMap<TestKey, usize>>>,
}

impl TestOutputQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queue: PriorityOutputQueue::new(config),
            active_tests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<TestKey, usize>> {
        self.active_tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying priority queue
    pub fn queue(&self) -> &PriorityOutputQueue {
        &self.queue
    }

    /// Submit output belonging to one test.
    ///
    /// The test stays in the active set until every operation submitted for
    /// it has settled.
    pub fn submit_test_output<F, Fut>(
        &self,
        file: &str,
        name: &str,
        priority: Priority,
        data: impl Into<String>,
        executor: F,
    ) -> Result<CompletionHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        let key: TestKey = (file.to_string(), name.to_string());
        *self.active().entry(key.clone()).or_insert(0) += 1;

        let active_tests = Arc::clone(&self.active_tests);
        let release_key = key.clone();
        let hook = Box::new(move || release(&active_tests, &release_key));

        let request = OperationRequest::new(priority, OutputSource::Test, data, executor)
            .with_options(OperationOptions::for_test(file, name));

        self.queue
            .submit_with_hook(request, Some(hook))
            .inspect_err(|_| release(&self.active_tests, &key))
    }

    /// Submit test output and wait for it to settle
    pub async fn enqueue_test_output<F, Fut>(
        &self,
        file: &str,
        name: &str,
        priority: Priority,
        data: impl Into<String>,
        executor: F,
    ) -> OperationResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.submit_test_output(file, name, priority, data, executor)?
            .await
    }

    /// Wait for every operation of one test to settle.
    ///
    /// Gives up after the configured ceiling and force-removes whatever is
    /// still queued for the test. Returns whether the output settled in time.
    pub async fn complete_test(&self, file: &str, name: &str) -> bool {
        let config = self.queue.config();
        let deadline = Instant::now() + config.test_completion_timeout;

        loop {
            if !self.has_test_output(file, name) && !self.is_active(file, name) {
                debug!(file, name, "Test output complete");
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(config.poll_interval).await;
        }

        let removed = self.queue.remove_pending(
            |op| op.matches_test(file, name),
            || {
                StreamError::queue_with_code(
                    ErrorCode::QUEUE_TEST_COMPLETION_TIMEOUT,
                    format!("output for test '{}' in {} did not complete", name, file),
                )
            },
        );
        self.active().remove(&(file.to_string(), name.to_string()));
        warn!(
            file,
            name,
            removed,
            "Timed out waiting for test output; removed remaining operations"
        );
        false
    }

    /// Whether the queue currently holds output for this test
    pub fn has_test_output(&self, file: &str, name: &str) -> bool {
        self.queue.any_pending(|op| op.matches_test(file, name))
    }

    fn is_active(&self, file: &str, name: &str) -> bool {
        self.active()
            .contains_key(&(file.to_string(), name.to_string()))
    }

    /// Tests with output currently in flight, sorted by file then name
    pub fn active_tests(&self) -> Vec<TestKey> {
        let mut tests: Vec<TestKey> = self.active().keys().cloned().collect();
        tests.sort();
        tests
    }

    pub fn submit(&self, request: OperationRequest) -> Result<CompletionHandle> {
        self.queue.submit(request)
    }

    pub fn clear(&self) {
        self.queue.clear();
    }

    pub async fn drain(&self) {
        self.queue.drain().await;
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

fn release(active_tests: &Mutex<HashMap<TestKey, usize>>, key: &TestKey) {
    let mut active = active_tests.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(count) = active.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            active.remove(key);
        }
    }
}
