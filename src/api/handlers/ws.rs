//! WebSocket push of newly stored receipts

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::auth::Access;
use crate::domain::Document;
use crate::server::AppState;

/// `GET /ws`
///
/// Every receipt stored after the upgrade is sent as one JSON text frame.
pub async fn receipts_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.access.authorize(&headers, Access::Read)?;

    let rx = state.sink.subscribe();
    Ok(ws.on_upgrade(move |socket| stream_receipts(socket, rx)))
}

async fn stream_receipts(mut socket: WebSocket, mut rx: broadcast::Receiver<Arc<Document>>) {
    debug!("Receipt subscriber connected");
    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Receipt subscriber socket error");
                        break;
                    }
                }
            }
            receipt = rx.recv() => {
                match receipt {
                    Ok(receipt) => {
                        let text = match serde_json::to_string(receipt.as_ref()) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode receipt for subscriber");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Receipt subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("Receipt subscriber disconnected");
}
