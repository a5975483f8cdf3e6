//! Receipt Gateway Library
//!
//! Durable receipt store and reliable delivery for a blockchain REST and
//! WebSocket gateway. Result messages for asynchronous operations are
//! written through a retrying write path, pushed to live subscribers, and
//! served back through a filtered, newest-first query API.
//!
//! ## Modules
//!
//! - [`domain`] - Receipt documents, sequence keys and query filters
//! - [`infra`] - Store backends (sled, in-memory, PostgreSQL), write path, delivery
//! - [`api`] - Query façade and REST/WebSocket routes
//! - [`auth`] - Access policies for the HTTP layer
//! - [`metrics`] - In-process metrics
//! - [`telemetry`] - Logging setup
//! - [`server`] - Configuration, state and server bootstrap

pub mod api;
pub mod auth;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{Document, ReceiptFilter, SequenceKey, SequenceKeyGenerator};

pub use infra::{
    DeliverySink, ReceiptStore, ReliableWriter, Result, StoreError, WriteError, WriteOutcome,
};
