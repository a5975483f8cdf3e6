//! Delivery sinks for newly stored receipts

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::Document;

use super::{DeliveryError, DeliverySink};

/// Default number of receipts buffered per subscriber
pub const DEFAULT_DELIVERY_BUFFER: usize = 1024;

/// Fans receipts out to live subscribers over a broadcast channel.
///
/// Sending never waits; subscribers that fall behind by more than the buffer
/// miss the oldest receipts.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<Document>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to receipts stored from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Document>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_BUFFER)
    }
}

impl DeliverySink for BroadcastSink {
    fn send(&self, receipt: &Document) -> Result<(), DeliveryError> {
        match self.tx.send(Arc::new(receipt.clone())) {
            Ok(receivers) => {
                debug!(receivers = receivers, "Receipt pushed to subscribers");
                Ok(())
            }
            Err(_) => Err(DeliveryError::NoSubscribers),
        }
    }
}

/// Sink that drops every receipt
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DeliverySink for NoopSink {
    fn send(&self, _receipt: &Document) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn receipt(id: &str) -> Document {
        json!({ "_id": id }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx1 = sink.subscribe();
        let mut rx2 = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 2);

        sink.send(&receipt("r1")).unwrap();

        assert_eq!(rx1.recv().await.unwrap()["_id"], "r1");
        assert_eq!(rx2.recv().await.unwrap()["_id"], "r1");
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let sink = BroadcastSink::new(8);
        assert_eq!(
            sink.send(&receipt("r1")),
            Err(DeliveryError::NoSubscribers)
        );
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_sender() {
        let sink = BroadcastSink::new(2);
        let mut rx = sink.subscribe();

        for i in 0..10 {
            sink.send(&receipt(&format!("r{i}"))).unwrap();
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(8))
        ));
        assert_eq!(rx.recv().await.unwrap()["_id"], "r8");
    }

    #[test]
    fn test_noop_sink() {
        assert!(NoopSink.send(&receipt("r1")).is_ok());
    }
}
