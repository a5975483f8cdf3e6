//! Trait definitions for the receipt store and delivery capabilities

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{Document, ReceiptFilter};

use super::{DeliveryError, Result};

/// Durable, queryable record of asynchronous operation outcomes.
///
/// Invariants:
/// - Each business id maps to at most one stored receipt (first write wins).
/// - A lookup entry is only created after its primary record is written, so
///   `get_by_id` never observes a dangling index entry.
/// - Stored receipts are immutable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Store `receipt` under `id`.
    ///
    /// Stamps `receivedAt` and, when missing, `_id`, then returns the
    /// document as persisted. Fails with `DuplicateKey` if `id` is taken.
    async fn insert(&self, id: &str, receipt: Document) -> Result<Document>;

    /// Point lookup by business id. `Ok(None)` when no receipt exists.
    async fn get_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Filtered, newest-first range query.
    ///
    /// Unreadable records are skipped rather than failing the query.
    async fn query(&self, filter: &ReceiptFilter) -> Result<Vec<Document>>;

    /// Release underlying resources. Later calls fail with `Closed`.
    async fn close(&self) -> Result<()>;

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Push channel for newly stored receipts.
///
/// `send` must not block; a slow or absent consumer must never create
/// backpressure on the write path.
#[cfg_attr(test, automock)]
pub trait DeliverySink: Send + Sync {
    fn send(&self, receipt: &Document) -> std::result::Result<(), DeliveryError>;
}
