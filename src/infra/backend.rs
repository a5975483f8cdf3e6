//! Backend selection
//!
//! The receipt store implementation is chosen once at startup.

use std::sync::Arc;
use tracing::{info, warn};

use super::config::{BackendConfig, ReceiptStoreConfig};
use super::kv::KvReceiptStore;
use super::memory::MemoryKv;
use super::postgres::PgReceiptStore;
use super::sled::SledKv;
use super::{ReceiptStore, Result};

/// Open the receipt store described by `config`
pub async fn open_store(config: &ReceiptStoreConfig) -> Result<Arc<dyn ReceiptStore>> {
    let store: Arc<dyn ReceiptStore> = match &config.backend {
        BackendConfig::Embedded { path } => {
            info!(path = %path.display(), "Opening embedded receipt store");
            let path = path.clone();
            let kv = tokio::task::spawn_blocking(move || SledKv::open(path)).await??;
            let store = KvReceiptStore::new(kv);
            check_max_docs(config.max_docs, || store.stored_count());
            Arc::new(store)
        }
        BackendConfig::Database {
            url,
            max_connections,
        } => {
            info!(max_connections = max_connections, "Connecting to receipt database");
            let store = PgReceiptStore::from_url(url, *max_connections).await?;
            if config.max_docs > 0 {
                let count = store.count().await?;
                check_max_docs(config.max_docs, || Ok(count.max(0) as usize));
            }
            Arc::new(store)
        }
        BackendConfig::Memory => {
            info!("Using in-memory receipt store; receipts are not durable");
            Arc::new(KvReceiptStore::new(MemoryKv::new()))
        }
    };

    info!(
        backend = store.backend_name(),
        max_docs = config.max_docs,
        query_limit = config.query_limit,
        "Receipt store ready"
    );
    Ok(store)
}

/// `maxDocs` is informational: warn when it is already exceeded
fn check_max_docs<F>(max_docs: usize, count: F)
where
    F: FnOnce() -> Result<usize>,
{
    if max_docs == 0 {
        return;
    }
    match count() {
        Ok(stored) if stored > max_docs => {
            warn!(stored = stored, max_docs = max_docs, "Receipt store holds more than maxDocs receipts");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not count stored receipts"),
    }
}
