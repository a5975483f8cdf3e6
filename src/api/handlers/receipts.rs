//! Receipt query and ingestion handlers

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::api::error::{receipt_not_found, ApiError};
use crate::api::query::ListReceiptsParams;
use crate::auth::Access;
use crate::domain::Document;
use crate::server::AppState;

/// Response for an accepted result message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAccepted {
    pub request_id: String,
}

/// `GET /v1/receipts`
///
/// Query pairs are taken raw so `id` can repeat.
pub async fn list_receipts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Document>>, ApiError> {
    state.access.authorize(&headers, Access::Read)?;

    let params = ListReceiptsParams::from_pairs(pairs);
    let receipts = state.query.list(&params).await?;
    Ok(Json(receipts))
}

/// `GET /v1/receipts/:id`
pub async fn get_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    state.access.authorize(&headers, Access::Read)?;

    match state.query.get(&id).await? {
        Some(receipt) => Ok(Json(receipt)),
        None => Err(receipt_not_found(&id)),
    }
}

/// `POST /v1/receipts/ingest`
///
/// The body is a raw result message. The write runs in the background, so
/// acceptance does not mean the receipt is stored yet.
pub async fn ingest_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestAccepted>), ApiError> {
    state.access.authorize(&headers, Access::Write)?;

    let request_id = state.processor.process_receipt(&body).await?;
    Ok((StatusCode::ACCEPTED, Json(IngestAccepted { request_id })))
}
