//! Performance benchmarks for the subscription engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_channel::bounded;
use livewatch::{
    CancelToken, ChannelSink, ConnectionId, Dispatcher, ExecutionEngine, ExecutionError, Registry,
    ResultEvent, ResultStream, SubscriptionRequest, Variables,
};
use serde_json::json;
use std::sync::Arc;

/// Engine that pre-loads `count` events and closes the stream.
struct BatchEngine {
    count: usize,
}

impl ExecutionEngine for BatchEngine {
    fn execute(
        &self,
        _token: CancelToken,
        _query: &str,
        _operation_name: Option<&str>,
        _variables: &Variables,
    ) -> Result<ResultStream, ExecutionError> {
        let (tx, rx) = bounded(self.count.max(1));
        for i in 0..self.count {
            let _ = tx.send(ResultEvent::data(json!(i)));
        }
        Ok(rx)
    }
}

fn test_sink() -> Arc<ChannelSink> {
    // Capacity large enough that delivery never blocks in the benches.
    let (sink, rx) = ChannelSink::new(100_000);
    std::mem::forget(rx);
    Arc::new(sink)
}

/// Benchmark a full register/unregister cycle against a populated registry
fn bench_register_unregister(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_unregister");

    for existing in [0, 100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("existing_subscriptions", existing),
            &existing,
            |b, &existing| {
                let registry = Registry::new();
                for i in 0..existing {
                    registry
                        .register(
                            ConnectionId(i as u64),
                            SubscriptionRequest::new("s0", "cpu"),
                            test_sink(),
                        )
                        .unwrap();
                }

                let owner = ConnectionId(u64::MAX);
                let sink = test_sink();
                b.iter(|| {
                    registry
                        .register(
                            owner,
                            SubscriptionRequest::new("bench", "cpu"),
                            sink.clone(),
                        )
                        .unwrap();
                    black_box(registry.unregister(owner, "bench"));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark snapshot cost as the registry grows
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [10, 100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("subscriptions", size),
            &size,
            |b, &size| {
                let registry = Registry::new();
                for i in 0..size {
                    registry
                        .register(
                            ConnectionId((i % 16) as u64),
                            SubscriptionRequest::new(format!("s{}", i), "cpu"),
                            test_sink(),
                        )
                        .unwrap();
                }

                b.iter(|| {
                    black_box(registry.snapshot());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark end-to-end forwarding throughput: subscribe, drain the sink,
/// unregister
fn bench_forwarding_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("forwarding_throughput");

    for events in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("events", events),
            &events,
            |b, &events| {
                let registry = Arc::new(Registry::new());
                let dispatcher = Dispatcher::new(
                    registry.clone(),
                    Arc::new(BatchEngine { count: events }),
                    CancelToken::new(),
                );
                let owner = ConnectionId(1);

                b.iter(|| {
                    let (sink, rx) = ChannelSink::new(events.max(1));
                    dispatcher
                        .subscribe(owner, SubscriptionRequest::new("s1", "cpu"), Arc::new(sink))
                        .unwrap();
                    for _ in 0..events {
                        black_box(rx.recv().unwrap());
                    }
                    registry.unregister(owner, "s1");
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_register_unregister,
    bench_snapshot,
    bench_forwarding_throughput,
);

criterion_main!(benches);
