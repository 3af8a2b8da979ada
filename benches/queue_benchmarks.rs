//! Throughput benchmarks for the output queue and error classification

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::future::join_all;
use reporter_stream::queue::{
    OperationRequest, OutputSource, Priority, PriorityOutputQueue, QueueConfig,
};
use reporter_stream::recovery::{classify_error, ErrorContext};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

const PRIORITIES: [Priority; 4] = [
    Priority::Critical,
    Priority::High,
    Priority::Normal,
    Priority::Low,
];

async fn run_operations(queue: &PriorityOutputQueue, count: usize) {
    let handles: Vec<_> = (0..count)
        .map(|i| {
            let request = OperationRequest::new(
                PRIORITIES[i % PRIORITIES.len()],
                OutputSource::Test,
                format!("line {i}"),
                move || async move {
                    black_box(i);
                    Ok(())
                },
            );
            queue.submit(request).unwrap()
        })
        .collect();

    for result in join_all(handles).await {
        result.unwrap();
    }
}

fn bench_queue_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_throughput");
    group
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(5));

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("unbatched", count), &count, |b, &count| {
            let queue = PriorityOutputQueue::new(QueueConfig {
                max_size: 1000,
                enable_batching: false,
                ..Default::default()
            });
            b.to_async(&rt).iter(|| run_operations(&queue, count));
        });

        group.bench_with_input(BenchmarkId::new("batched", count), &count, |b, &count| {
            let queue = PriorityOutputQueue::new(QueueConfig {
                max_size: 1000,
                batch_timeout: Duration::ZERO,
                ..Default::default()
            });
            b.to_async(&rt).iter(|| run_operations(&queue, count));
        });
    }

    group.finish();
}

fn bench_error_classification(c: &mut Criterion) {
    let context = ErrorContext::new("stream_test_result");
    let messages = [
        "operation timed out after 30000ms",
        "connection reset by peer",
        "queue size limit exceeded (max 1000)",
        "write failed: broken pipe",
        "something unexpected happened",
    ];

    c.bench_function("classify_error", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(classify_error(black_box(message), "Error", &context));
            }
        });
    });
}

criterion_group!(benches, bench_queue_throughput, bench_error_classification);
criterion_main!(benches);
