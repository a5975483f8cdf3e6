//! REST routes for the receipt gateway.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{get_receipt, ingest_receipt, list_receipts};
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/receipts", get(list_receipts))
        .route("/v1/receipts/ingest", post(ingest_receipt))
        .route("/v1/receipts/:id", get(get_receipt))
}

/// Root-level routes kept for existing gateway clients.
pub fn compat_router() -> Router<AppState> {
    Router::new()
        .route("/receipts", get(list_receipts))
        .route("/receipts/:id", get(get_receipt))
}
