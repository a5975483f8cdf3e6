//! Receipt store over an ordered byte-key engine
//!
//! Key space layout:
//! - `r/<sequence key>` holds the receipt body (JSON)
//! - `l/<business id>` holds the sequence key of that receipt
//!
//! The prefixes differ in their first byte, so a scan over one space never
//! surfaces entries of the other.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    attach_sequence_key, decode_document, stamp_receipt, Document, PageCollector, ReceiptFilter,
    SequenceKey, SequenceKeyGenerator,
};

use super::{ReceiptStore, Result, StoreError};

/// Callback for reverse scans; return `ControlFlow::Break` to stop early
pub type ScanVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> ControlFlow<()> + 'a;

/// Minimal contract of an ordered key-value engine.
///
/// Implementations must provide point-level atomicity for each call and
/// visit keys in byte order. Reads must not be blocked by writers.
pub trait OrderedKv: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write only if `key` is absent. Returns false when the key exists.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool>;

    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Visit entries with `lower <= key < upper`, highest key first
    fn scan_rev(&self, lower: &[u8], upper: &[u8], visit: &mut ScanVisitor<'_>) -> Result<()>;

    /// Persist buffered writes
    fn flush(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub mod keys {
    //! Key encoding for the two key spaces

    use crate::domain::SequenceKey;

    pub const PRIMARY_PREFIX: &[u8] = b"r/";
    pub const LOOKUP_PREFIX: &[u8] = b"l/";

    /// First key after every primary key (`/` + 1 is `0`)
    const PRIMARY_END: &[u8] = b"r0";

    pub fn primary_key(key: &SequenceKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(PRIMARY_PREFIX.len() + SequenceKey::ENCODED_LEN);
        out.extend_from_slice(PRIMARY_PREFIX);
        out.extend_from_slice(key.encode().as_bytes());
        out
    }

    pub fn lookup_key(id: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOOKUP_PREFIX.len() + id.len());
        out.extend_from_slice(LOOKUP_PREFIX);
        out.extend_from_slice(id.as_bytes());
        out
    }

    /// Decode a primary key back into its sequence key
    pub fn decode_primary(raw: &[u8]) -> Option<SequenceKey> {
        let encoded = raw.strip_prefix(PRIMARY_PREFIX)?;
        SequenceKey::parse(std::str::from_utf8(encoded).ok()?).ok()
    }

    /// Decode the value of a lookup entry
    pub fn decode_lookup_value(raw: &[u8]) -> Option<SequenceKey> {
        SequenceKey::parse(std::str::from_utf8(raw).ok()?).ok()
    }

    /// Bounds `[lower, upper)` of a primary scan.
    ///
    /// `since` is inclusive, `before` (a page cursor) is exclusive.
    pub fn primary_range(
        since: Option<SequenceKey>,
        before: Option<SequenceKey>,
    ) -> (Vec<u8>, Vec<u8>) {
        let lower = since.map_or_else(|| PRIMARY_PREFIX.to_vec(), |k| primary_key(&k));
        let upper = before.map_or_else(|| PRIMARY_END.to_vec(), |k| primary_key(&k));
        (lower, upper)
    }
}

/// [`ReceiptStore`] implemented over any [`OrderedKv`] engine
pub struct KvReceiptStore<K: OrderedKv> {
    kv: Arc<K>,
    keys: SequenceKeyGenerator,
    closed: AtomicBool,
}

impl<K: OrderedKv> KvReceiptStore<K> {
    pub fn new(kv: K) -> Self {
        Self::with_generator(kv, SequenceKeyGenerator::new())
    }

    pub fn with_generator(kv: K, keys: SequenceKeyGenerator) -> Self {
        Self {
            kv: Arc::new(kv),
            keys,
            closed: AtomicBool::new(false),
        }
    }

    /// Direct access to the underlying engine
    pub fn backend(&self) -> &K {
        &self.kv
    }

    /// Number of stored receipts (full scan of the primary space)
    pub fn stored_count(&self) -> Result<usize> {
        self.ensure_open()?;
        let (lower, upper) = keys::primary_range(None, None);
        let mut count = 0usize;
        self.kv.scan_rev(&lower, &upper, &mut |_: &[u8], _: &[u8]| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: OrderedKv> ReceiptStore for KvReceiptStore<K> {
    async fn insert(&self, id: &str, receipt: Document) -> Result<Document> {
        self.ensure_open()?;

        let key = self.keys.next_key();
        let kv = Arc::clone(&self.kv);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || insert_record(&*kv, &id, receipt, &key)).await?
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.ensure_open()?;

        let kv = Arc::clone(&self.kv);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || get_record(&*kv, &id)).await?
    }

    async fn query(&self, filter: &ReceiptFilter) -> Result<Vec<Document>> {
        self.ensure_open()?;
        if filter.since_beyond_keys() {
            return Ok(Vec::new());
        }

        let kv = Arc::clone(&self.kv);
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || query_by_scan(&*kv, &filter)).await?
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.kv.flush()?;
        info!(backend = self.kv.name(), "Receipt store closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.kv.name()
    }
}

fn insert_record<K: OrderedKv>(
    kv: &K,
    id: &str,
    receipt: Document,
    key: &SequenceKey,
) -> Result<Document> {
    let lookup = keys::lookup_key(id);
    if kv.get(&lookup)?.is_some() {
        return Err(StoreError::DuplicateKey(id.to_string()));
    }

    let mut doc = receipt;
    stamp_receipt(&mut doc, id, key);
    let body = serde_json::to_vec(&doc)?;

    // Primary record first; the lookup entry must never dangle.
    let primary = keys::primary_key(key);
    kv.put(&primary, &body)?;

    if !kv.put_if_absent(&lookup, key.encode().as_bytes())? {
        // A concurrent insert of the same id won the lookup entry.
        kv.remove(&primary)?;
        return Err(StoreError::DuplicateKey(id.to_string()));
    }

    debug!(id = %id, sequence_key = %key, backend = kv.name(), "Receipt stored");
    Ok(doc)
}

fn get_record<K: OrderedKv>(kv: &K, id: &str) -> Result<Option<Document>> {
    let Some(raw) = kv.get(&keys::lookup_key(id))? else {
        return Ok(None);
    };
    let key = keys::decode_lookup_value(&raw)
        .ok_or_else(|| StoreError::corrupt(id, "unreadable lookup entry"))?;
    let body = kv
        .get(&keys::primary_key(&key))?
        .ok_or_else(|| StoreError::corrupt(id, "missing primary record"))?;
    let doc = decode_document(&body).map_err(|e| StoreError::corrupt(id, e))?;
    Ok(Some(doc))
}

/// Reverse scan of the primary space between the since bound and the cursor.
///
/// Id filters go through the same scan as every other filter: a receipt
/// matches on its `id` or `_id` field, which the lookup index cannot answer.
fn query_by_scan<K: OrderedKv>(kv: &K, filter: &ReceiptFilter) -> Result<Vec<Document>> {
    let (lower, upper) = keys::primary_range(filter.lower_bound(), filter.start_cursor);
    let mut page = PageCollector::new(filter);
    let mut corrupt = 0usize;

    kv.scan_rev(&lower, &upper, &mut |key: &[u8], value: &[u8]| {
        let mut doc = match decode_document(value) {
            Ok(doc) => doc,
            Err(_) => {
                corrupt += 1;
                return ControlFlow::Continue(());
            }
        };
        if !filter.matches(&doc) {
            return ControlFlow::Continue(());
        }
        if let Some(seq) = keys::decode_primary(key) {
            attach_sequence_key(&mut doc, &seq);
        }
        if page.offer(doc) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    })?;

    if corrupt > 0 {
        warn!(skipped = corrupt, "Skipped unreadable receipts during query");
    }
    Ok(page.finish())
}
