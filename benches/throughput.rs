//! Throughput Benchmark for LiteKV
//!
//! Measures the store, the command router, the wire parser and the
//! snapshot encoder under a few representative workloads.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use litekv::commands::Router;
use litekv::persistence::snapshot;
use litekv::protocol::{parse_message, Message};
use litekv::storage::{Item, Store, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let store = Arc::new(Store::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.set(format!("key:{}", i), Item::string("small_value"));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = "x".repeat(1024);
        b.iter(|| {
            store.set(format!("key:{}", i), Item::string(value.clone()));
            i += 1;
        });
    });

    group.bench_function("set_with_expiry", |b| {
        let mut i = 0u64;
        let expires_at = SystemTime::now() + Duration::from_secs(3600);
        b.iter(|| {
            store.set_with_expiry(format!("ttl:{}", i), Item::string("value"), expires_at);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let store = Arc::new(Store::new());

    for i in 0..100_000 {
        store.set(format!("key:{}", i), Item::string(format!("value:{}", i)));
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&format!("key:{}", i % 100_000)));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&format!("missing:{}", i)));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark INCR through the router
fn bench_incr(c: &mut Criterion) {
    let router = Router::new(Arc::new(Store::new()));

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    // Single counter (item lock contention only)
    group.bench_function("single_counter", |b| {
        let commands = vec!["INCR".to_string(), "counter".to_string()];
        b.iter(|| {
            black_box(router.dispatch_commands(&commands));
        });
    });

    group.bench_function("multiple_counters", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let commands = vec!["INCR".to_string(), format!("counter:{}", i % 1000)];
            black_box(router.dispatch_commands(&commands));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let store = Arc::new(Store::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            store.set(key.clone(), Item::string("value"));
                            store.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.len());
        });
    });

    group.finish();
}

/// Benchmark request parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    let set = Message::bulk_array(["SET", "user:1000", "some moderately sized value"]).serialize();
    group.throughput(Throughput::Bytes(set.len() as u64));
    group.bench_function("set_request", |b| {
        b.iter(|| black_box(parse_message(black_box(&set))));
    });

    let rpush = Message::bulk_array(
        std::iter::once("RPUSH".to_string())
            .chain(std::iter::once("list".to_string()))
            .chain((0..100).map(|i| format!("element-{}", i))),
    )
    .serialize();
    group.throughput(Throughput::Bytes(rpush.len() as u64));
    group.bench_function("rpush_100_values", |b| {
        b.iter(|| black_box(parse_message(black_box(&rpush))));
    });

    group.finish();
}

/// Benchmark snapshot encoding and decoding
fn bench_snapshot(c: &mut Criterion) {
    let expires_at = SystemTime::now() + Duration::from_secs(3600);
    let mut entries = HashMap::new();
    for i in 0..10_000 {
        let value = match i % 3 {
            0 => Value::new(Item::string(format!("value:{}", i))),
            1 => Value::with_expiry(Item::string(i.to_string()), expires_at),
            _ => {
                let list = Item::list();
                let _ = list.rpush(&["a".to_string(), "b".to_string(), "c".to_string()]);
                Value::new(list)
            }
        };
        entries.insert(format!("key:{}", i), value);
    }
    let bytes = snapshot::save(&entries).unwrap();

    let mut group = c.benchmark_group("snapshot");
    group.throughput(Throughput::Elements(entries.len() as u64));

    group.bench_function("save_10k", |b| {
        b.iter(|| black_box(snapshot::save(&entries).unwrap()));
    });

    group.bench_function("load_10k", |b| {
        b.iter(|| black_box(snapshot::load(&bytes).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_incr,
    bench_concurrent,
    bench_parse,
    bench_snapshot,
);

criterion_main!(benches);
