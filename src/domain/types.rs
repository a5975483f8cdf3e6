//! Core type definitions for the receipt store
//!
//! Receipts are schemaless JSON objects. The store only interprets a handful
//! of well-known fields, named by the constants below.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// A schemaless receipt document
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Store-level correlation id, set from the `requestId` header
pub const FIELD_INTERNAL_ID: &str = "_id";

/// Producer-supplied business id
pub const FIELD_ID: &str = "id";

/// Server-assigned insertion time in epoch milliseconds
pub const FIELD_RECEIVED_AT: &str = "receivedAt";

/// Sequence key attached to query results, usable as a page cursor
pub const FIELD_SEQUENCE_KEY: &str = "_sequenceKey";

pub const FIELD_FROM: &str = "from";
pub const FIELD_TO: &str = "to";

/// Totally ordered key assigned to a receipt at insert time.
///
/// Encoded as a 26 character ULID: a 48-bit millisecond timestamp followed by
/// 80 bits of randomness. The textual encoding sorts the same way as the
/// underlying value, so byte comparison of encoded keys is time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceKey(Ulid);

impl SequenceKey {
    /// Length of the encoded key in bytes
    pub const ENCODED_LEN: usize = 26;

    /// Largest millisecond timestamp a key can carry (48 bits)
    pub const MAX_TIMESTAMP_MS: u64 = (1 << 48) - 1;

    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }

    /// Smallest key that can be issued at `timestamp_ms`
    pub fn lower_bound(timestamp_ms: u64) -> Self {
        Self::from_parts(timestamp_ms, 0)
    }

    /// Parse an encoded key, e.g. a client supplied page cursor
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    pub fn random(&self) -> u128 {
        self.0.random()
    }

    pub fn encode(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SequenceKey {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SequenceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for SequenceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Filter for receipt range queries.
///
/// All attribute filters combine with AND. Empty `ids`, `None` for
/// `from`/`to`/`start_cursor` and zero for `since_epoch_ms` mean "no
/// constraint". A `limit` of zero is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptFilter {
    pub ids: BTreeSet<String>,
    pub since_epoch_ms: i64,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Exclusive upper bound of the reverse scan
    pub start_cursor: Option<SequenceKey>,
    pub skip: usize,
    pub limit: usize,
}

impl ReceiptFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_since(mut self, since_epoch_ms: i64) -> Self {
        self.since_epoch_ms = since_epoch_ms;
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_start_cursor(mut self, cursor: SequenceKey) -> Self {
        self.start_cursor = Some(cursor);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Lower bound of the primary key scan, if `since` is set.
    ///
    /// `None` also when `since` lies beyond the last representable key; check
    /// [`since_beyond_keys`](Self::since_beyond_keys) first.
    pub fn lower_bound(&self) -> Option<SequenceKey> {
        if self.since_epoch_ms <= 0 || self.since_beyond_keys() {
            return None;
        }
        Some(SequenceKey::lower_bound(self.since_epoch_ms as u64))
    }

    /// True when `since` is later than any key can be, so nothing matches
    pub fn since_beyond_keys(&self) -> bool {
        self.since_epoch_ms > SequenceKey::MAX_TIMESTAMP_MS as i64
    }

    /// Attribute filters (ids, from, to) against a decoded document
    pub fn matches(&self, doc: &Document) -> bool {
        if !self.ids.is_empty() {
            let hit = [FIELD_ID, FIELD_INTERNAL_ID]
                .iter()
                .filter_map(|field| doc.get(*field).and_then(|v| v.as_str()))
                .any(|id| self.ids.contains(id));
            if !hit {
                return false;
            }
        }
        field_equals(doc, FIELD_FROM, self.from.as_deref())
            && field_equals(doc, FIELD_TO, self.to.as_deref())
    }
}

fn field_equals(doc: &Document, field: &str, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => doc.get(field).and_then(|v| v.as_str()) == Some(expected),
    }
}

/// Stamp server-assigned fields on a receipt about to be stored under `key`.
///
/// `receivedAt` always comes from the key's timestamp so it agrees with the
/// key order. `_id` is only filled in when the producer did not set it.
pub fn stamp_receipt(doc: &mut Document, id: &str, key: &SequenceKey) {
    doc.insert(
        FIELD_RECEIVED_AT.to_string(),
        serde_json::Value::from(key.timestamp_ms()),
    );
    doc.entry(FIELD_INTERNAL_ID.to_string())
        .or_insert_with(|| serde_json::Value::String(id.to_string()));
}

/// Attach the sequence key to a query result so it can be used as a cursor
pub fn attach_sequence_key(doc: &mut Document, key: &SequenceKey) {
    doc.insert(
        FIELD_SEQUENCE_KEY.to_string(),
        serde_json::Value::String(key.encode()),
    );
}

/// Decode a stored receipt body. Anything other than a JSON object is corrupt.
pub fn decode_document(bytes: &[u8]) -> Result<Document, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Collects the `skip`/`limit` window of a newest-first stream of matches.
#[derive(Debug)]
pub struct PageCollector {
    skip: usize,
    limit: usize,
    items: Vec<Document>,
}

impl PageCollector {
    pub fn new(filter: &ReceiptFilter) -> Self {
        Self {
            skip: filter.skip,
            limit: filter.limit,
            items: Vec::new(),
        }
    }

    /// Offer a matching document. Returns false once the page is full.
    pub fn offer(&mut self, doc: Document) -> bool {
        if self.is_full() {
            return false;
        }
        if self.skip > 0 {
            self.skip -= 1;
        } else {
            self.items.push(doc);
        }
        !self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.limit > 0 && self.items.len() >= self.limit
    }

    pub fn finish(self) -> Vec<Document> {
        self.items
    }
}
