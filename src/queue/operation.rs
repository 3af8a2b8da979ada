//! Queued output operations and their completion handles

use crate::error::{ErrorCode, Result, StreamError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Output priority levels (lower number = higher priority).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Debug = 4,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Debug => "debug",
        }
    }
}

/// Where an output operation originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    #[default]
    System,
    Suite,
    Test,
    Console,
    Error,
}

impl OutputSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSource::System => "system",
            OutputSource::Suite => "suite",
            OutputSource::Test => "test",
            OutputSource::Console => "console",
            OutputSource::Error => "error",
        }
    }
}

/// Outcome delivered through a completion handle
pub type OperationResult = Result<()>;

/// Future produced by an executor
pub type OperationFuture = BoxFuture<'static, OperationResult>;

/// Callback performing the actual output work
pub type Executor = Box<dyn FnOnce() -> OperationFuture + Send>;

/// Everything needed to submit one operation
pub struct OperationRequest {
    pub priority: Priority,
    pub source: OutputSource,
    pub data: String,
    pub executor: Executor,
    pub options: OperationOptions,
}

impl OperationRequest {
    pub fn new<F, Fut>(priority: Priority, source: OutputSource, data: impl Into<String>, executor: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Self {
            priority,
            source,
            data: data.into(),
            executor: Box::new(move || Box::pin(executor()) as OperationFuture),
            options: OperationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Optional per-operation settings
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    pub test_file: Option<String>,
    pub test_name: Option<String>,
    /// Falls back to the queue's default timeout
    pub timeout: Option<Duration>,
}

impl OperationOptions {
    pub fn for_test(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            test_file: Some(file.into()),
            test_name: Some(name.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) type SettleHook = Box<dyn FnOnce() + Send>;

/// An operation waiting in, or taken from, the queue.
///
/// Only its position changes while queued; it leaves the queue exactly once
/// and `settle` consumes it.
pub struct QueuedOperation {
    pub id: Uuid,
    pub priority: Priority,
    pub source: OutputSource,
    pub test_file: Option<String>,
    pub test_name: Option<String>,
    pub data: String,
    pub enqueued_at: Instant,
    pub(crate) sequence: u64,
    pub timeout: Duration,
    pub(crate) executor: Executor,
    completion: oneshot::Sender<OperationResult>,
    on_settle: Option<SettleHook>,
}

impl std::fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("source", &self.source)
            .field("test_file", &self.test_file)
            .field("test_name", &self.test_name)
            .field("sequence", &self.sequence)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl QueuedOperation {
    pub(crate) fn new(
        request: OperationRequest,
        sequence: u64,
        default_timeout: Duration,
        on_settle: Option<SettleHook>,
    ) -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let operation = Self {
            id,
            priority: request.priority,
            source: request.source,
            test_file: request.options.test_file,
            test_name: request.options.test_name,
            data: request.data,
            enqueued_at: Instant::now(),
            sequence,
            timeout: request.options.timeout.unwrap_or(default_timeout),
            executor: request.executor,
            completion: tx,
            on_settle,
        };
        (operation, CompletionHandle { id, rx })
    }

    /// Ordering key: priority, then enqueue time, then submission order
    pub(crate) fn sort_key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }

    /// Whether `other` may join a batch led by this operation
    pub(crate) fn batches_with(&self, other: &QueuedOperation) -> bool {
        self.priority != Priority::Critical
            && other.priority == self.priority
            && other.test_file == self.test_file
    }

    pub fn matches_test(&self, file: &str, name: &str) -> bool {
        self.test_file.as_deref() == Some(file) && self.test_name.as_deref() == Some(name)
    }

    /// Split off the executor so the operation can be settled after it runs
    pub(crate) fn into_parts(self) -> (Executor, PendingCompletion) {
        (
            self.executor,
            PendingCompletion {
                id: self.id,
                timeout: self.timeout,
                completion: self.completion,
                on_settle: self.on_settle,
            },
        )
    }

    /// Reject without running the executor
    pub(crate) fn reject(self, error: StreamError) {
        let (_, pending) = self.into_parts();
        pending.settle(Err(error));
    }
}

/// The settle half of an operation whose executor has been taken
pub(crate) struct PendingCompletion {
    pub(crate) id: Uuid,
    pub(crate) timeout: Duration,
    completion: oneshot::Sender<OperationResult>,
    on_settle: Option<SettleHook>,
}

impl PendingCompletion {
    pub(crate) fn settle(self, result: OperationResult) {
        if let Some(hook) = self.on_settle {
            hook();
        }
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = self.completion.send(result);
    }
}

/// Resolves when the operation it was issued for settles.
#[derive(Debug)]
pub struct CompletionHandle {
    id: Uuid,
    rx: oneshot::Receiver<OperationResult>,
}

impl CompletionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for CompletionHandle {
    type Output = OperationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StreamError::queue_with_code(
                ErrorCode::QUEUE_OPERATION_DROPPED,
                format!("operation {} dropped without a result", self.id),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Debug);
        assert_eq!(Priority::Critical as u8, 0);
        assert_eq!(Priority::Debug as u8, 4);
    }

    #[tokio::test]
    async fn test_critical_never_batches() {
        let make = |priority| {
            QueuedOperation::new(
                OperationRequest::new(priority, OutputSource::Test, "x", || async { Ok(()) }),
                0,
                Duration::from_secs(1),
                None,
            )
            .0
        };
        let critical = make(Priority::Critical);
        let critical_peer = make(Priority::Critical);
        assert!(!critical.batches_with(&critical_peer));

        let normal = make(Priority::Normal);
        let normal_peer = make(Priority::Normal);
        assert!(normal.batches_with(&normal_peer));
        assert!(!normal.batches_with(&critical));
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_handle_with_error() {
        let (operation, handle) = QueuedOperation::new(
            OperationRequest::new(Priority::Low, OutputSource::System, "x", || async { Ok(()) }),
            0,
            Duration::from_secs(1),
            None,
        );
        drop(operation);
        let err = handle.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::QUEUE_OPERATION_DROPPED);
    }
}
