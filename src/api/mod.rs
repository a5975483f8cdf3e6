//! API layer for the receipt gateway
//!
//! REST query and ingestion endpoints plus a WebSocket push feed.

pub mod error;
pub mod handlers;
pub mod query;
mod rest;

pub use error::{ApiError, ErrorCode};
pub use query::{ListReceiptsParams, QueryError, ReceiptQueryService};
pub use rest::*;
