//! Infrastructure layer for the receipt gateway
//!
//! Contains trait definitions and implementations for:
//! - Receipt storage (sled, in-memory, PostgreSQL) over one capability trait
//! - Backend selection from configuration
//! - The reliable write path (retry, backoff, duplicate detection)
//! - Delivery sinks for live subscribers
//! - Inbound message processing
//! - Graceful shutdown (write draining)

mod backend;
pub mod config;
mod delivery;
mod error;
mod graceful_shutdown;
pub mod kv;
mod memory;
pub mod postgres;
mod processor;
pub mod retry;
pub mod sled;
mod traits;
mod writer;

pub use backend::open_store;
pub use config::{BackendConfig, ConfigError, ReceiptStoreConfig};
pub use delivery::{BroadcastSink, NoopSink, DEFAULT_DELIVERY_BUFFER};
pub use error::*;
pub use graceful_shutdown::{
    serve_with_shutdown, shutdown_signal, GracefulShutdownConfig, InFlightGuard, InFlightTracker,
    ShutdownCoordinator, ShutdownSignal,
};
pub use kv::{KvReceiptStore, OrderedKv};
pub use memory::MemoryKv;
pub use postgres::PgReceiptStore;
pub use processor::{InboundReceipt, IngestError, ReceiptHeaders, ReceiptProcessor, MSG_TYPE_ERROR};
pub use retry::RetryConfig;
pub use self::sled::SledKv;
pub use traits::*;
pub use writer::{ExhaustionPolicy, ReliableWriter, WriteError, WriteOutcome};
