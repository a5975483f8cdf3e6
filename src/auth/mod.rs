//! Access control for the receipt API
//!
//! The HTTP layer holds an [`AccessPolicy`] in its state and asks it before
//! serving any receipt endpoint. There is no process-wide hook: tests and
//! embedders pass whatever policy they need.
//!
//! # Configuration
//!
//! - `RECEIPTS_API_KEYS`: comma-separated keys. When set, [`ApiKeyPolicy`]
//!   is used; otherwise every request is allowed.

mod api_key;

pub use api_key::*;

use std::sync::Arc;

use axum::http::HeaderMap;

/// Kind of access a handler needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Query receipts
    Read,
    /// Ingest result messages
    Write,
}

/// Authentication error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("insufficient permissions")]
    InsufficientPermissions,
}

/// Decides whether a request may perform an operation
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, headers: &HeaderMap, access: Access) -> Result<(), AuthError>;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _headers: &HeaderMap, _access: Access) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Build the policy selected by the environment
pub fn policy_from_env() -> Arc<dyn AccessPolicy> {
    policy_from_keys(std::env::var("RECEIPTS_API_KEYS").ok().as_deref())
}

/// Build a policy from a comma-separated key list; empty means allow all
pub fn policy_from_keys(keys: Option<&str>) -> Arc<dyn AccessPolicy> {
    let keys: Vec<&str> = keys
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();

    if keys.is_empty() {
        tracing::info!("Receipt API authentication disabled");
        Arc::new(AllowAll)
    } else {
        tracing::info!(keys = keys.len(), "Receipt API key authentication enabled");
        Arc::new(ApiKeyPolicy::from_keys(keys))
    }
}
