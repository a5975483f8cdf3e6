//! Performance benchmarks for the receipt store.
//!
//! Run with: cargo bench

use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use receipt_gateway::domain::{Document, ReceiptFilter, SequenceKeyGenerator};
use receipt_gateway::infra::{KvReceiptStore, MemoryKv, OrderedKv, ReceiptStore, SledKv};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// A transaction result shaped like what the dispatcher produces
fn sample_receipt(i: u64) -> Document {
    let value = json!({
        "headers": {
            "requestId": format!("req-{i}"),
            "reqOffset": format!("{i}"),
            "type": "TransactionSuccess"
        },
        "transactionHash": format!("0x{i:064x}"),
        "blockNumber": i,
        "from": format!("0x{:040x}", i % 16),
        "to": format!("0x{:040x}", (i + 1) % 16),
        "gasUsed": 21_000 + i % 1000,
        "status": 1
    });
    match value {
        serde_json::Value::Object(doc) => doc,
        _ => unreachable!(),
    }
}

async fn fill<K: OrderedKv>(store: &KvReceiptStore<K>, count: u64) {
    for i in 0..count {
        store
            .insert(&format!("seed-{i}"), sample_receipt(i))
            .await
            .expect("seed insert");
    }
}

/// Benchmark sequence key issuance
fn bench_sequence_keys(c: &mut Criterion) {
    let generator = SequenceKeyGenerator::new();
    c.bench_function("sequence_key_next", |b| {
        b.iter(|| black_box(generator.next_key()));
    });
}

/// Benchmark single receipt inserts
fn bench_insert(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("receipt_insert");
    group.throughput(Throughput::Elements(1));

    let memory = KvReceiptStore::new(MemoryKv::new());
    let counter = AtomicU64::new(0);
    group.bench_function("memory", |b| {
        b.to_async(&rt).iter(|| async {
            let i = counter.fetch_add(1, Ordering::Relaxed);
            black_box(memory.insert(&format!("m-{i}"), sample_receipt(i)).await)
        });
    });

    let dir = tempfile::tempdir().expect("temp dir");
    let sled = KvReceiptStore::new(SledKv::open(dir.path()).expect("open sled"));
    group.bench_function("sled", |b| {
        b.to_async(&rt).iter(|| async {
            let i = counter.fetch_add(1, Ordering::Relaxed);
            black_box(sled.insert(&format!("s-{i}"), sample_receipt(i)).await)
        });
    });

    group.finish();
}

/// Benchmark the query paths against a pre-filled store
fn bench_query(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("receipt_query");

    for size in [1_000u64, 10_000].iter() {
        let store = KvReceiptStore::new(MemoryKv::new());
        rt.block_on(fill(&store, *size));

        let latest = ReceiptFilter::new().with_limit(10);
        group.bench_with_input(BenchmarkId::new("latest_page", size), size, |b, _| {
            b.to_async(&rt).iter(|| async { black_box(store.query(&latest).await) });
        });

        let by_sender = ReceiptFilter::new()
            .with_from(format!("0x{:040x}", 3))
            .with_limit(10);
        group.bench_with_input(BenchmarkId::new("from_filter", size), size, |b, _| {
            b.to_async(&rt).iter(|| async { black_box(store.query(&by_sender).await) });
        });

        let by_id = ReceiptFilter::new().with_ids(["seed-1", "seed-500", "seed-999"]);
        group.bench_with_input(BenchmarkId::new("id_filter", size), size, |b, _| {
            b.to_async(&rt).iter(|| async { black_box(store.query(&by_id).await) });
        });

        group.bench_with_input(BenchmarkId::new("get_by_id", size), size, |b, _| {
            b.to_async(&rt).iter(|| async { black_box(store.get_by_id("seed-42").await) });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequence_keys, bench_insert, bench_query);
criterion_main!(benches);
