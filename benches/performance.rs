//! Performance benchmarks for key diffs and subscription fan-in.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickertape::{
    diff, key_set, AttemptId, BrokerHandle, Client, ClientConfig, KeySnapshot, KeyTable,
    KeyUsage, Listener, RecordingTransport, SubscriptionRequest, TransportEvent,
};

fn table(size: usize) -> KeyTable {
    let mut table = KeyTable::new();
    for i in 0..size {
        let name = format!("key-{}", i);
        if i % 2 == 0 {
            table.add(name, format!("secret-{}", i).into_bytes(), true).unwrap();
        } else {
            table.add(name, vec![i as u8; 32], false).unwrap();
        }
    }
    table
}

/// Benchmark diffing two overlapping key selections
fn bench_key_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_diff");

    for size in [4, 32, 256] {
        let keys = table(size);
        let old: Vec<String> = (0..size).map(|i| format!("key-{}", i)).collect();
        let new: Vec<String> = (size / 2..size + size / 2)
            .map(|i| format!("key-{}", i))
            .collect();

        group.bench_with_input(BenchmarkId::new("names", size), &size, |b, _| {
            b.iter(|| {
                black_box(diff(
                    KeySnapshot::new(&keys, &old),
                    KeySnapshot::new(&keys, &new),
                    KeyUsage::Subscription,
                ))
            });
        });
    }

    group.finish();
}

/// Benchmark building a notification key set
fn bench_key_set(c: &mut Criterion) {
    let keys = table(64);
    let names: Vec<String> = (0..64).map(|i| format!("key-{}", i)).collect();

    c.bench_function("key_set_64", |b| {
        b.iter(|| black_box(key_set(&keys, &names, KeyUsage::Notification)));
    });
}

/// Benchmark subscribing many callers to a shared expression
fn bench_shared_subscribe(c: &mut Criterion) {
    c.bench_function("subscribe_1000_shared", |b| {
        b.iter(|| {
            let transport = RecordingTransport::new();
            let client = Client::new(ClientConfig::new("elvin://localhost"), transport).unwrap();
            client.start();
            client.handle_event(TransportEvent::ConnectResult {
                attempt: AttemptId(1),
                result: Ok(BrokerHandle(1)),
            });
            for i in 0..1000 {
                let expression = format!("TICKERTAPE == \"group-{}\"", i % 10);
                client
                    .subscribe(SubscriptionRequest::new(expression, Listener::new(|_| {})))
                    .unwrap();
            }
            black_box(client.subscriptions().len())
        });
    });
}

criterion_group!(benches, bench_key_diff, bench_key_set, bench_shared_subscribe);
criterion_main!(benches);
