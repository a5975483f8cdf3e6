//! Receipt query façade
//!
//! Turns raw request parameters into a validated [`ReceiptFilter`] and runs
//! it against the configured store. All input checking happens here so the
//! store only ever sees well-formed filters.

use std::sync::Arc;

use chrono::DateTime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Document, ReceiptFilter, SequenceKey};
use crate::infra::config::DEFAULT_QUERY_LIMIT;
use crate::infra::{ReceiptStore, StoreError};
use crate::metrics::{metric_names, timed, MetricsRegistry};

/// Page size used when the caller gives no limit and no ids
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Raw list parameters, exactly as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListReceiptsParams {
    pub ids: Vec<String>,
    pub limit: Option<String>,
    pub skip: Option<String>,
    pub since: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub start: Option<String>,
}

impl ListReceiptsParams {
    /// Collect parameters from decoded query pairs.
    ///
    /// `id` may repeat; for the other keys the last occurrence wins.
    /// Unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "id" => params.ids.push(value),
                "limit" => params.limit = Some(value),
                "skip" => params.skip = Some(value),
                "since" => params.since = Some(value),
                "from" => params.from = Some(value),
                "to" => params.to = Some(value),
                "start" | "startCursor" => params.start = Some(value),
                _ => {}
            }
        }
        params
    }
}

/// Rejected query input, or a store failure while answering
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid receipt id: {0:?}")]
    InvalidId(String),

    #[error("limit {limit} exceeds the maximum of {max}")]
    LimitExceeded { limit: usize, max: usize },

    #[error("limit must be a non-negative integer, got {0:?}")]
    BadLimit(String),

    #[error("skip must be a non-negative integer, got {0:?}")]
    BadSkip(String),

    #[error("since must be an RFC3339 timestamp or epoch milliseconds, got {0:?}")]
    BadSince(String),

    #[error("start is not a valid cursor: {0:?}")]
    BadCursor(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    /// Whether the caller sent bad input (as opposed to a backend failure)
    pub fn is_validation(&self) -> bool {
        !matches!(self, QueryError::Store(_))
    }
}

/// Receipt ids are restricted to `[0-9A-Za-z-]+`
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Parse `since` as RFC3339 or as an epoch-millisecond integer.
///
/// Instants past the last representable sequence key are rejected.
pub fn parse_since(raw: &str) -> Result<i64, QueryError> {
    let raw = raw.trim();
    let ms = match raw.parse::<i64>() {
        Ok(ms) => ms,
        Err(_) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.timestamp_millis())
            .map_err(|_| QueryError::BadSince(raw.to_string()))?,
    };
    if ms > SequenceKey::MAX_TIMESTAMP_MS as i64 {
        return Err(QueryError::BadSince(raw.to_string()));
    }
    Ok(ms)
}

fn parse_count(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok()
}

/// Validated access to the receipt store for the HTTP layer
pub struct ReceiptQueryService {
    store: Arc<dyn ReceiptStore>,
    query_limit: usize,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ReceiptQueryService {
    pub fn new(store: Arc<dyn ReceiptStore>, query_limit: usize) -> Self {
        let query_limit = if query_limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            query_limit
        };
        Self {
            store,
            query_limit,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn query_limit(&self) -> usize {
        self.query_limit
    }

    pub fn store(&self) -> &Arc<dyn ReceiptStore> {
        &self.store
    }

    /// Validate raw parameters into a filter without touching the store
    pub fn build_filter(&self, params: &ListReceiptsParams) -> Result<ReceiptFilter, QueryError> {
        if let Some(bad) = params.ids.iter().find(|id| !is_valid_id(id)) {
            return Err(QueryError::InvalidId(bad.clone()));
        }

        let default_limit = if params.ids.is_empty() {
            DEFAULT_PAGE_SIZE
        } else {
            0
        };
        let limit = match params.limit.as_deref() {
            None => default_limit,
            Some(raw) => match parse_count(raw) {
                Some(0) => default_limit,
                Some(n) if n > self.query_limit => {
                    return Err(QueryError::LimitExceeded {
                        limit: n,
                        max: self.query_limit,
                    })
                }
                Some(n) => n,
                None => return Err(QueryError::BadLimit(raw.to_string())),
            },
        };

        let skip = match params.skip.as_deref() {
            None => 0,
            Some(raw) => parse_count(raw).ok_or_else(|| QueryError::BadSkip(raw.to_string()))?,
        };

        let mut filter = ReceiptFilter::new()
            .with_ids(params.ids.iter().cloned())
            .with_skip(skip)
            .with_limit(limit);

        if let Some(raw) = params.since.as_deref() {
            filter = filter.with_since(parse_since(raw)?);
        }
        if let Some(from) = params.from.as_deref().filter(|s| !s.is_empty()) {
            filter = filter.with_from(from);
        }
        if let Some(to) = params.to.as_deref().filter(|s| !s.is_empty()) {
            filter = filter.with_to(to);
        }
        if let Some(raw) = params.start.as_deref().filter(|s| !s.is_empty()) {
            let cursor =
                SequenceKey::parse(raw).map_err(|_| QueryError::BadCursor(raw.to_string()))?;
            filter = filter.with_start_cursor(cursor);
        }

        Ok(filter)
    }

    /// Newest-first list of receipts matching `params`.
    ///
    /// An empty result is a normal answer, not an error.
    pub async fn list(&self, params: &ListReceiptsParams) -> Result<Vec<Document>, QueryError> {
        let filter = match self.build_filter(params) {
            Ok(filter) => filter,
            Err(e) => {
                debug!(error = %e, "Rejected receipt query");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_counter(metric_names::QUERY_REJECTED).await;
                }
                return Err(e);
            }
        };

        let result = match &self.metrics {
            Some(metrics) => {
                timed(metrics, metric_names::QUERY_LATENCY, self.store.query(&filter)).await
            }
            None => self.store.query(&filter).await,
        };

        result.map_err(|e| {
            warn!(error = %e, "Receipt query failed");
            QueryError::Store(e)
        })
    }

    /// Single receipt by business id
    pub async fn get(&self, id: &str) -> Result<Option<Document>, QueryError> {
        if !is_valid_id(id) {
            return Err(QueryError::InvalidId(id.to_string()));
        }
        Ok(self.store.get_by_id(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MockReceiptStore;
    use mockall::predicate::always;
    use serde_json::json;

    fn service_with(store: MockReceiptStore) -> ReceiptQueryService {
        ReceiptQueryService::new(Arc::new(store), 100)
    }

    fn params(pairs: &[(&str, &str)]) -> ListReceiptsParams {
        ListReceiptsParams::from_pairs(pairs.iter().map(|(k, v)| (*k, v.to_string())))
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id("abc-123-DEF"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("abc_123"));
        assert!(!is_valid_id("a b"));
        assert!(!is_valid_id("../etc"));
    }

    #[test]
    fn test_parse_since_formats() {
        assert_eq!(parse_since("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(
            parse_since("2023-11-14T22:13:20Z").unwrap(),
            1_700_000_000_000
        );
        assert_eq!(
            parse_since("2023-11-14T22:13:20.250+00:00").unwrap(),
            1_700_000_000_250
        );
        assert!(matches!(
            parse_since("yesterday"),
            Err(QueryError::BadSince(_))
        ));
    }

    #[test]
    fn test_parse_since_beyond_key_range() {
        let max = SequenceKey::MAX_TIMESTAMP_MS as i64;
        assert_eq!(parse_since(&max.to_string()).unwrap(), max);
        assert!(matches!(
            parse_since("281474976710657"),
            Err(QueryError::BadSince(_))
        ));
        assert!(matches!(
            parse_since("9999-12-31T23:59:59Z"),
            Ok(ms) if ms < max
        ));
    }

    #[test]
    fn test_default_limits() {
        let svc = service_with(MockReceiptStore::new());

        let filter = svc.build_filter(&params(&[])).unwrap();
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);

        let filter = svc.build_filter(&params(&[("id", "a"), ("id", "b")])).unwrap();
        assert_eq!(filter.limit, 0);
        assert_eq!(filter.ids.len(), 2);

        let filter = svc.build_filter(&params(&[("limit", "0")])).unwrap();
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);

        let filter = svc.build_filter(&params(&[("limit", "100")])).unwrap();
        assert_eq!(filter.limit, 100);
    }

    #[test]
    fn test_limit_cap_and_bad_numbers() {
        let svc = service_with(MockReceiptStore::new());

        assert!(matches!(
            svc.build_filter(&params(&[("limit", "101")])),
            Err(QueryError::LimitExceeded { limit: 101, max: 100 })
        ));
        assert!(matches!(
            svc.build_filter(&params(&[("limit", "-1")])),
            Err(QueryError::BadLimit(_))
        ));
        assert!(matches!(
            svc.build_filter(&params(&[("skip", "ten")])),
            Err(QueryError::BadSkip(_))
        ));
        assert!(matches!(
            svc.build_filter(&params(&[("start", "not-a-cursor")])),
            Err(QueryError::BadCursor(_))
        ));
        assert!(matches!(
            svc.build_filter(&params(&[("id", "bad id")])),
            Err(QueryError::InvalidId(_))
        ));
    }

    #[test]
    fn test_filter_fields_carried_through() {
        let svc = service_with(MockReceiptStore::new());
        let cursor = SequenceKey::from_parts(1_700_000_000_000, 7).encode();

        let filter = svc
            .build_filter(&params(&[
                ("from", "alice"),
                ("to", "bob"),
                ("skip", "3"),
                ("since", "1700000000000"),
                ("start", &cursor),
                ("unknown", "ignored"),
            ]))
            .unwrap();

        assert_eq!(filter.from.as_deref(), Some("alice"));
        assert_eq!(filter.to.as_deref(), Some("bob"));
        assert_eq!(filter.skip, 3);
        assert_eq!(filter.since_epoch_ms, 1_700_000_000_000);
        assert_eq!(filter.start_cursor.map(|k| k.encode()), Some(cursor));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_store() {
        let mut store = MockReceiptStore::new();
        store.expect_query().never();
        let svc = service_with(store);

        let err = svc.list(&params(&[("limit", "500")])).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let mut store = MockReceiptStore::new();
        store
            .expect_query()
            .with(always())
            .returning(|_| Ok(Vec::new()));
        let svc = service_with(store);

        let docs = svc.list(&params(&[("id", "missing")])).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_store_error_is_not_validation() {
        let mut store = MockReceiptStore::new();
        store
            .expect_query()
            .returning(|_| Err(StoreError::Internal("disk".into())));
        let svc = service_with(store);

        let err = svc.list(&ListReceiptsParams::default()).await.unwrap_err();
        assert!(!err.is_validation());
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let mut store = MockReceiptStore::new();
        store
            .expect_get_by_id()
            .withf(|id| id == "r-1")
            .returning(|_| match json!({"_id": "r-1"}) {
                serde_json::Value::Object(doc) => Ok(Some(doc)),
                _ => Ok(None),
            });
        let svc = service_with(store);
        let doc = svc.get("r-1").await.unwrap().unwrap();
        assert_eq!(doc["_id"], "r-1");
        assert!(matches!(
            svc.get("r 1").await,
            Err(QueryError::InvalidId(_))
        ));
    }
}
