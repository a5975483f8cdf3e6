//! Inbound result message handling
//!
//! Decodes a raw result message, checks its header block and hands the
//! receipt to the reliable write path.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Document, FIELD_INTERNAL_ID};
use crate::metrics::{metric_names, MetricsRegistry};

use super::writer::ReliableWriter;

/// Message type carried by failed operations
pub const MSG_TYPE_ERROR: &str = "Error";

/// Why an inbound message was not accepted
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no headers.requestId")]
    MissingRequestId,
}

/// Header block of a result message.
///
/// Only `requestId` is required downstream; a header of the wrong type reads
/// as absent instead of failing the message.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptHeaders {
    #[serde(default, deserialize_with = "string_or_none")]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub req_offset: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "string_or_none")]
    pub msg_type: Option<String>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// A decoded result message ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReceipt {
    pub request_id: String,
    pub headers: ReceiptHeaders,
    pub document: Document,
}

impl InboundReceipt {
    /// Decode and validate a raw message.
    ///
    /// Sets `_id` to the request id so the stored receipt is addressable by it.
    pub fn parse(bytes: &[u8]) -> Result<Self, IngestError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let serde_json::Value::Object(mut document) = value else {
            return Err(IngestError::NotAnObject);
        };

        let headers = document
            .get("headers")
            .filter(|h| h.is_object())
            .cloned()
            .map(serde_json::from_value::<ReceiptHeaders>)
            .transpose()?
            .unwrap_or_default();

        let request_id = headers
            .request_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(IngestError::MissingRequestId)?;

        document.insert(
            FIELD_INTERNAL_ID.to_string(),
            serde_json::Value::String(request_id.clone()),
        );

        Ok(Self {
            request_id,
            headers,
            document,
        })
    }

    pub fn is_error(&self) -> bool {
        self.headers.msg_type.as_deref() == Some(MSG_TYPE_ERROR)
    }

    /// The field worth logging: the error text or the transaction hash
    pub fn summary(&self) -> Option<&str> {
        let field = if self.is_error() {
            "errorMessage"
        } else {
            "transactionHash"
        };
        self.document.get(field).and_then(|v| v.as_str())
    }
}

/// Entry point for result messages from the dispatcher
pub struct ReceiptProcessor {
    writer: Arc<ReliableWriter>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ReceiptProcessor {
    pub fn new(writer: Arc<ReliableWriter>) -> Self {
        Self {
            writer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn writer(&self) -> &Arc<ReliableWriter> {
        &self.writer
    }

    /// Decode a message and start its write in the background.
    ///
    /// Returns the request id once the write is scheduled. Malformed messages
    /// are rejected without touching the store.
    pub async fn process_receipt(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let inbound = match InboundReceipt::parse(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Rejected result message");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_counter(metric_names::MESSAGES_REJECTED).await;
                }
                return Err(e);
            }
        };

        let offset = inbound.headers.req_offset.as_deref().unwrap_or("");
        let msg_type = inbound.headers.msg_type.as_deref().unwrap_or("");
        if inbound.is_error() {
            info!(
                id = %inbound.request_id,
                offset = offset,
                msg_type = msg_type,
                error_message = inbound.summary().unwrap_or(""),
                "Received failure result"
            );
        } else {
            info!(
                id = %inbound.request_id,
                offset = offset,
                msg_type = msg_type,
                tx_hash = inbound.summary().unwrap_or(""),
                "Received result"
            );
        }

        let request_id = inbound.request_id.clone();
        self.writer.spawn(inbound.request_id, inbound.document);
        Ok(request_id)
    }
}
