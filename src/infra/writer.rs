//! Reliable write path for receipts
//!
//! Every inbound result runs as its own task: insert with backoff, detect
//! duplicates through a point lookup, then push the stored receipt to the
//! delivery sink. Retry exhaustion is reported to the owning supervisor as a
//! typed error; the write path never terminates the process itself.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::Document;
use crate::metrics::{metric_names, MetricsRegistry};

use super::graceful_shutdown::{InFlightTracker, ShutdownSignal};
use super::retry::{Attempt, Retry, RetryConfig, RetryError};
use super::{DeliveryError, DeliverySink, ReceiptStore, StoreError};

/// How a retry-exhausted write is escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Report to the supervisor, which stops the service with an error
    #[default]
    Fatal,
    /// Log and count the failure; the service keeps running
    Surface,
}

impl fmt::Display for ExhaustionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionPolicy::Fatal => write!(f, "fatal"),
            ExhaustionPolicy::Surface => write!(f, "surface"),
        }
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(ExhaustionPolicy::Fatal),
            "surface" => Ok(ExhaustionPolicy::Surface),
            other => Err(format!("expected `fatal` or `surface`, got `{other}`")),
        }
    }
}

/// Successful end states of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored by this write and pushed to the sink
    Inserted { attempts: u32 },
    /// Already stored by an earlier write; first write wins
    Duplicate { attempts: u32 },
}

impl WriteOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            WriteOutcome::Inserted { attempts } | WriteOutcome::Duplicate { attempts } => *attempts,
        }
    }
}

/// Terminal failures of a write
#[derive(Error, Debug)]
pub enum WriteError {
    /// The retry budget ran out; the receipt is not stored
    #[error("receipt {id} not stored after {attempts} attempts in {elapsed:?}: {last_error}")]
    RetryExhausted {
        id: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last_error: StoreError,
    },

    /// Shutdown interrupted the retry loop
    #[error("write of receipt {id} cancelled by shutdown after {attempts} attempts")]
    Cancelled { id: String, attempts: u32 },

    /// The store was closed underneath the write
    #[error("receipt store closed before {id} was stored")]
    StoreClosed { id: String },

    /// The store rejected the receipt permanently
    #[error("receipt {id} rejected: {source}")]
    Rejected {
        id: String,
        #[source]
        source: StoreError,
    },
}

impl WriteError {
    pub fn id(&self) -> &str {
        match self {
            WriteError::RetryExhausted { id, .. }
            | WriteError::Cancelled { id, .. }
            | WriteError::StoreClosed { id }
            | WriteError::Rejected { id, .. } => id,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, WriteError::RetryExhausted { .. })
    }
}

enum Stored {
    Inserted(Document),
    Duplicate,
}

/// Retry/backoff/duplicate-aware wrapper around [`ReceiptStore::insert`]
pub struct ReliableWriter {
    store: Arc<dyn ReceiptStore>,
    sink: Arc<dyn DeliverySink>,
    retry: Retry,
    policy: ExhaustionPolicy,
    failures: Option<mpsc::UnboundedSender<WriteError>>,
    in_flight: Arc<InFlightTracker>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ReliableWriter {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        sink: Arc<dyn DeliverySink>,
        config: RetryConfig,
    ) -> Self {
        Self {
            store,
            sink,
            retry: Retry::new(config),
            policy: ExhaustionPolicy::default(),
            failures: None,
            in_flight: Arc::new(InFlightTracker::new()),
            metrics: None,
        }
    }

    /// Cancel backoff sleeps on shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.retry = self.retry.with_shutdown(signal);
        self
    }

    /// Escalation policy and the supervisor channel fatal failures go to
    pub fn with_exhaustion_policy(
        mut self,
        policy: ExhaustionPolicy,
        failures: Option<mpsc::UnboundedSender<WriteError>>,
    ) -> Self {
        self.policy = policy;
        self.failures = failures;
        self
    }

    /// Track spawned writes in a shared tracker
    pub fn with_in_flight(mut self, tracker: Arc<InFlightTracker>) -> Self {
        self.in_flight = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn in_flight(&self) -> &Arc<InFlightTracker> {
        &self.in_flight
    }

    /// Persist one receipt, retrying transient failures.
    ///
    /// Pushes the stored document to the sink only when this call inserted it.
    pub async fn write(&self, id: &str, receipt: Document) -> Result<WriteOutcome, WriteError> {
        let start = Instant::now();
        let result = self
            .retry
            .run("receipt_write", |attempt| {
                let receipt = receipt.clone();
                async move { self.attempt(id, receipt, attempt).await }
            })
            .await;

        match result {
            Ok(done) => {
                self.observe(metric_names::WRITE_LATENCY, start.elapsed()).await;
                match done.value {
                    Stored::Inserted(stored) => {
                        self.count(metric_names::RECEIPTS_INSERTED).await;
                        self.deliver(id, &stored).await;
                        Ok(WriteOutcome::Inserted {
                            attempts: done.attempts,
                        })
                    }
                    Stored::Duplicate => {
                        self.count(metric_names::RECEIPTS_DUPLICATE).await;
                        warn!(id = %id, attempts = done.attempts, "Duplicate receipt, keeping the first write");
                        Ok(WriteOutcome::Duplicate {
                            attempts: done.attempts,
                        })
                    }
                }
            }
            Err(RetryError::Exhausted {
                last_error,
                attempts,
                elapsed,
            }) => {
                self.count(metric_names::WRITE_EXHAUSTED).await;
                Err(WriteError::RetryExhausted {
                    id: id.to_string(),
                    attempts,
                    elapsed,
                    last_error,
                })
            }
            Err(RetryError::Cancelled { attempts }) => {
                self.count(metric_names::WRITE_CANCELLED).await;
                Err(WriteError::Cancelled {
                    id: id.to_string(),
                    attempts,
                })
            }
            Err(RetryError::Aborted {
                error: StoreError::Closed,
                ..
            }) => Err(WriteError::StoreClosed { id: id.to_string() }),
            Err(RetryError::Aborted { error, .. }) => Err(WriteError::Rejected {
                id: id.to_string(),
                source: error,
            }),
        }
    }

    /// Run [`write`](Self::write) as an independent task.
    ///
    /// Terminal errors are handled according to the exhaustion policy.
    pub fn spawn(self: &Arc<Self>, id: String, receipt: Document) -> JoinHandle<()> {
        let guard = self.in_flight.start();
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            match writer.write(&id, receipt).await {
                Ok(outcome) => {
                    debug!(id = %id, attempts = outcome.attempts(), "Receipt write finished");
                }
                Err(err) => writer.report(err),
            }
        })
    }

    async fn attempt(&self, id: &str, receipt: Document, attempt: u32) -> Attempt<Stored, StoreError> {
        let insert_err = match self.store.insert(id, receipt).await {
            Ok(stored) => return Attempt::Done(Stored::Inserted(stored)),
            Err(StoreError::Closed) => return Attempt::Abort(StoreError::Closed),
            Err(e) => e,
        };

        match self.store.get_by_id(id).await {
            Ok(Some(_)) => Attempt::Done(Stored::Duplicate),
            Ok(None) if !insert_err.is_transient() => Attempt::Abort(insert_err),
            Ok(None) => {
                self.count(metric_names::WRITE_RETRIES).await;
                Attempt::Retry(insert_err)
            }
            Err(StoreError::Closed) => Attempt::Abort(StoreError::Closed),
            Err(lookup_err) => {
                warn!(
                    id = %id,
                    attempt = attempt,
                    error = %lookup_err,
                    "Duplicate check failed after insert error"
                );
                self.count(metric_names::WRITE_RETRIES).await;
                Attempt::Retry(insert_err)
            }
        }
    }

    async fn deliver(&self, id: &str, stored: &Document) {
        match self.sink.send(stored) {
            Ok(()) => {}
            Err(DeliveryError::NoSubscribers) => {
                debug!(id = %id, "No subscribers for stored receipt");
            }
            Err(e) => {
                self.count(metric_names::DELIVERY_DROPPED).await;
                warn!(id = %id, error = %e, "Failed to push stored receipt");
            }
        }
    }

    fn report(&self, err: WriteError) {
        match err {
            WriteError::RetryExhausted { .. } if self.policy == ExhaustionPolicy::Fatal => {
                error!(id = %err.id(), error = %err, "Receipt write exhausted retries, escalating");
                match &self.failures {
                    Some(tx) => {
                        if tx.send(err).is_err() {
                            error!("Supervisor is gone; receipt write failure not escalated");
                        }
                    }
                    None => error!("No supervisor registered; receipt write failure not escalated"),
                }
            }
            WriteError::RetryExhausted { .. } => {
                error!(id = %err.id(), error = %err, "Receipt write exhausted retries, receipt lost");
            }
            WriteError::Cancelled { .. } => {
                info!(id = %err.id(), error = %err, "Receipt write abandoned on shutdown");
            }
            _ => {
                error!(id = %err.id(), error = %err, "Receipt write failed");
            }
        }
    }

    async fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_counter(name).await;
        }
    }

    async fn observe(&self, name: &str, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics
                .observe_histogram(name, elapsed.as_secs_f64() * 1000.0)
                .await;
        }
    }
}
