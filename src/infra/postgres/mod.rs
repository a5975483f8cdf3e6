//! PostgreSQL implementations
//!
//! Provides the document-database receipt store.

mod receipt_store;

pub use receipt_store::*;
