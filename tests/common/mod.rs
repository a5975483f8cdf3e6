//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use receipt_gateway::domain::{Document, ReceiptFilter, SequenceKeyGenerator};
use receipt_gateway::infra::{
    DeliveryError, DeliverySink, KvReceiptStore, MemoryKv, OrderedKv, ReceiptStore, SledKv,
    StoreError,
};

/// Base timestamp for clock-driven tests (2023-11-14T22:13:20Z)
pub const BASE_MS: u64 = 1_700_000_000_000;

/// Build a receipt document from a JSON object literal
pub fn receipt(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("receipt fixture must be an object, got {other}"),
    }
}

/// A successful transaction result with a sender and recipient
pub fn transfer(id: &str, from: Option<&str>, to: Option<&str>) -> Document {
    let mut doc = receipt(json!({
        "headers": { "requestId": id, "type": "TransactionSuccess" },
        "transactionHash": format!("0x{}", hex_of(id)),
    }));
    if let Some(from) = from {
        doc.insert("from".into(), json!(from));
    }
    if let Some(to) = to {
        doc.insert("to".into(), json!(to));
    }
    doc
}

fn hex_of(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Ids of query results, in result order
pub fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d["_id"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Millisecond clock advanced by hand
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn starting_at(ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(ms)))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn generator(&self) -> SequenceKeyGenerator {
        let clock = self.clone();
        SequenceKeyGenerator::with_clock(move || clock.now())
    }
}

pub fn memory_store() -> KvReceiptStore<MemoryKv> {
    KvReceiptStore::new(MemoryKv::new())
}

pub fn memory_store_with_clock(clock: &ManualClock) -> KvReceiptStore<MemoryKv> {
    KvReceiptStore::with_generator(MemoryKv::new(), clock.generator())
}

pub fn sled_store(dir: &tempfile::TempDir) -> KvReceiptStore<SledKv> {
    KvReceiptStore::new(SledKv::open(dir.path()).unwrap())
}

pub fn sled_store_with_clock(
    dir: &tempfile::TempDir,
    clock: &ManualClock,
) -> KvReceiptStore<SledKv> {
    KvReceiptStore::with_generator(SledKv::open(dir.path()).unwrap(), clock.generator())
}

/// Write a raw value into the primary key space, bypassing `insert`
pub fn put_raw_primary<K: OrderedKv>(store: &KvReceiptStore<K>, key_ms: u64, body: &[u8]) {
    let key = receipt_gateway::domain::SequenceKey::from_parts(key_ms, 0);
    store
        .backend()
        .put(&receipt_gateway::infra::kv::keys::primary_key(&key), body)
        .unwrap();
}

/// Store wrapper whose first `failures` inserts fail transiently
pub struct FlakyStore {
    inner: Arc<dyn ReceiptStore>,
    remaining_failures: AtomicU32,
    insert_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ReceiptStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            insert_calls: AtomicU32::new(0),
        }
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptStore for FlakyStore {
    async fn insert(&self, id: &str, receipt: Document) -> receipt_gateway::Result<Document> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Internal("simulated write failure".into()));
        }
        self.inner.insert(id, receipt).await
    }

    async fn get_by_id(&self, id: &str) -> receipt_gateway::Result<Option<Document>> {
        self.inner.get_by_id(id).await
    }

    async fn query(&self, filter: &ReceiptFilter) -> receipt_gateway::Result<Vec<Document>> {
        self.inner.query(filter).await
    }

    async fn close(&self) -> receipt_gateway::Result<()> {
        self.inner.close().await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Sink recording every delivered receipt
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Document>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<Document> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl DeliverySink for RecordingSink {
    fn send(&self, receipt: &Document) -> Result<(), DeliveryError> {
        self.delivered.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}
