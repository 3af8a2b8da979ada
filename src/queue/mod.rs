//! Priority-ordered output queue
//!
//! Operations are kept sorted by priority, then enqueue time. A single
//! processing task drains the queue, yielding between items, and can group
//! same-priority, same-file operations into batches that run concurrently.
//! Each operation races its executor against its own timeout.

pub mod operation;
pub mod test_output;


pub use operation::{
    CompletionHandle, Executor, OperationFuture, OperationOptions, OperationRequest,
    OperationResult, OutputSource, Priority, QueuedOperation,
};
pub use test_output::TestOutputQueue;

use crate::error::{ErrorCode, Result, StreamError};
use operation::{PendingCompletion, SettleHook};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of pending operations before new work is rejected
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Timeout applied to operations that do not set their own
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Group same-priority, same-file operations
    #[serde(default = "default_enable_batching")]
    pub enable_batching: bool,

    /// Maximum operations per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum time spent assembling one batch
    #[serde(default = "default_batch_timeout", with = "humantime_serde")]
    pub batch_timeout: Duration,

    /// Poll interval for `drain()` and `complete_test()`
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Ceiling for waiting on one test's output in `complete_test()`
    #[serde(default = "default_test_completion_timeout", with = "humantime_serde")]
    pub test_completion_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_timeout: default_operation_timeout(),
            enable_batching: default_enable_batching(),
            max_batch_size: default_max_batch_size(),
            batch_timeout: default_batch_timeout(),
            poll_interval: default_poll_interval(),
            test_completion_timeout: default_test_completion_timeout(),
        }
    }
}

fn default_max_size() -> usize {
    1000
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_enable_batching() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    10
}

fn default_batch_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_test_completion_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
    pub total_rejected: u64,
    pub total_batches: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub average_processing_time_ms: f64,
    pub is_processing: bool,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueuedOperation>,
    processing: bool,
    active_batch: bool,
    next_sequence: u64,
    stats: QueueStats,
}

impl QueueState {
    fn record_outcome(&mut self, result: &OperationResult, elapsed: Duration) {
        self.stats.total_processed += 1;
        match result {
            Ok(()) => {}
            Err(err) if err.is_timeout() => {
                self.stats.total_failed += 1;
                self.stats.total_timed_out += 1;
            }
            Err(_) => self.stats.total_failed += 1,
        }
        let n = self.stats.total_processed as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.stats.average_processing_time_ms += (elapsed_ms - self.stats.average_processing_time_ms) / n;
    }
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded, priority-ordered output scheduler
#[derive(Clone)]
pub struct PriorityOutputQueue {
    inner: Arc<QueueInner>,
}

impl PriorityOutputQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue an operation and wait for it to settle
    pub async fn enqueue<F, Fut>(
        &self,
        priority: Priority,
        source: OutputSource,
        data: impl Into<String>,
        executor: F,
        options: OperationOptions,
    ) -> OperationResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        let request = OperationRequest::new(priority, source, data, executor).with_options(options);
        self.submit(request)?.await
    }

    /// Add an operation without waiting for it.
    ///
    /// Fails immediately, leaving the queue untouched, when it already holds
    /// `max_size` operations. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: OperationRequest) -> Result<CompletionHandle> {
        self.submit_with_hook(request, None)
    }

    pub(crate) fn submit_with_hook(
        &self,
        request: OperationRequest,
        on_settle: Option<SettleHook>,
    ) -> Result<CompletionHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StreamError::config_with_code(
                ErrorCode::CONFIG_NO_RUNTIME,
                "output queue requires a Tokio runtime",
            )
            .with_source(e)
        })?;

        let mut state = self.inner.lock();
        if state.pending.len() >= self.inner.config.max_size {
            state.stats.total_rejected += 1;
            drop(state);
            warn!(
                max_size = self.inner.config.max_size,
                "Rejecting output operation: queue size limit exceeded"
            );
            return Err(StreamError::queue_full(self.inner.config.max_size));
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let (operation, handle) = QueuedOperation::new(
            request,
            sequence,
            self.inner.config.default_timeout,
            on_settle,
        );
        trace!(
            id = %operation.id,
            priority = operation.priority.as_str(),
            source = operation.source.as_str(),
            "Enqueued output operation"
        );

        let key = operation.sort_key();
        let position = state.pending.partition_point(|queued| queued.sort_key() <= key);
        state.pending.insert(position, operation);
        state.stats.total_enqueued += 1;
        state.stats.current_size = state.pending.len();
        state.stats.peak_size = state.stats.peak_size.max(state.pending.len());

        if !state.processing {
            state.processing = true;
            state.stats.is_processing = true;
            runtime.spawn(process_loop(Arc::clone(&self.inner)));
        }

        Ok(handle)
    }

    /// Reject every pending operation and empty the queue
    pub fn clear(&self) {
        let cleared: Vec<QueuedOperation> = {
            let mut state = self.inner.lock();
            let cleared = std::mem::take(&mut state.pending);
            state.stats.current_size = 0;
            cleared
        };
        if !cleared.is_empty() {
            debug!(count = cleared.len(), "Clearing output queue");
        }
        for operation in cleared {
            operation.reject(StreamError::queue_cleared());
        }
    }

    /// Wait until the queue is empty and nothing is executing.
    ///
    /// Polls at the configured interval; intended for shutdown.
    pub async fn drain(&self) {
        loop {
            if self.is_idle() {
                return;
            }
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.pending.is_empty() && !state.processing && !state.active_batch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock().processing
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        let mut stats = state.stats.clone();
        stats.current_size = state.pending.len();
        stats.is_processing = state.processing;
        stats
    }

    /// Whether any pending operation satisfies `predicate`
    pub(crate) fn any_pending(&self, predicate: impl Fn(&QueuedOperation) -> bool) -> bool {
        self.inner.lock().pending.iter().any(predicate)
    }

    /// Remove matching pending operations, rejecting each with `make_error`
    pub(crate) fn remove_pending(
        &self,
        predicate: impl Fn(&QueuedOperation) -> bool,
        make_error: impl Fn() -> StreamError,
    ) -> usize {
        let removed: Vec<QueuedOperation> = {
            let mut state = self.inner.lock();
            let (removed, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.pending).into_iter().partition(|op| predicate(op));
            state.pending = kept;
            state.stats.current_size = state.pending.len();
            removed
        };
        let count = removed.len();
        for operation in removed {
            operation.reject(make_error());
        }
        count
    }
}

impl crate::health::QueueGauge for PriorityOutputQueue {
    fn queue_size(&self) -> usize {
        self.len()
    }
}

/// Take the next unit of work: one operation, or a batch led by the front.
///
/// Returns `None` and clears the processing flag once the queue is empty.
fn next_work(inner: &QueueInner) -> Option<Vec<QueuedOperation>> {
    let mut state = inner.lock();
    if state.pending.is_empty() {
        state.processing = false;
        state.stats.is_processing = false;
        return None;
    }

    let first = state.pending.remove(0);
    let mut work = vec![first];

    if inner.config.enable_batching && work[0].priority != Priority::Critical {
        let started = Instant::now();
        while work.len() < inner.config.max_batch_size
            && started.elapsed() < inner.config.batch_timeout
            && state
                .pending
                .first()
                .is_some_and(|candidate| work[0].batches_with(candidate))
        {
            work.push(state.pending.remove(0));
        }
    }

    state.active_batch = work.len() > 1;
    state.stats.current_size = state.pending.len();
    Some(work)
}

async fn process_loop(inner: Arc<QueueInner>) {
    while let Some(work) = next_work(&inner) {
        if work.len() == 1 {
            for operation in work {
                execute_operation(&inner, operation).await;
            }
        } else {
            debug!(size = work.len(), "Executing output batch");
            inner.lock().stats.total_batches += 1;
            futures::future::join_all(
                work.into_iter()
                    .map(|operation| execute_operation(&inner, operation)),
            )
            .await;
            inner.lock().active_batch = false;
        }
        tokio::task::yield_now().await;
    }
}

/// Run one operation's executor against its timeout and settle it.
///
/// The executor runs on its own task; when the timeout fires first the task
/// is detached and keeps running, only the result is discarded.
async fn execute_operation(inner: &QueueInner, operation: QueuedOperation) {
    let started = Instant::now();
    let (executor, pending) = operation.into_parts();
    let task = tokio::spawn(executor());

    let result = match tokio::time::timeout(pending.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(StreamError::execution_with_code(
            ErrorCode::EXEC_PANICKED,
            format!("executor for operation {} failed: {}", pending.id, join_error),
        )),
        Err(_) => {
            warn!(
                id = %pending.id,
                timeout_ms = pending.timeout.as_millis() as u64,
                "Output operation timed out"
            );
            Err(StreamError::operation_timeout(pending.id, pending.timeout))
        }
    };

    inner.lock().record_outcome(&result, started.elapsed());
    settle(pending, result);
}

fn settle(pending: PendingCompletion, result: OperationResult) {
    if let Err(err) = &result {
        debug!(id = %pending.id, error = %err, "Output operation failed");
    }
    pending.settle(result);
}
