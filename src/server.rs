//! HTTP server bootstrap for the receipt gateway.
//!
//! This module wires together:
//! - configuration
//! - the receipt store backend
//! - the reliable write path and its supervisor
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::handlers::{health_check, metrics_handler, readiness_check, receipts_ws};
use crate::api::ReceiptQueryService;
use crate::auth::{policy_from_env, AccessPolicy, AllowAll};
use crate::infra::{
    open_store, serve_with_shutdown, shutdown_signal, BroadcastSink, GracefulShutdownConfig,
    InFlightTracker, ReceiptProcessor, ReceiptStore, ReceiptStoreConfig, ReliableWriter,
    ShutdownCoordinator, ShutdownSignal, WriteError,
};
use crate::metrics::MetricsRegistry;
use crate::telemetry::{init_telemetry, TelemetryConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Receipt store and write path settings.
    pub receipts: ReceiptStoreConfig,
    /// Drain behaviour on shutdown.
    pub shutdown: GracefulShutdownConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = match std::env::var("PORT") {
            Ok(p) => p.parse().with_context(|| format!("invalid PORT {p:?}"))?,
            Err(_) => 8080,
        };

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        Ok(Self {
            listen_addr,
            receipts: ReceiptStoreConfig::from_env()?,
            shutdown: GracefulShutdownConfig::from_env(),
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<ReceiptQueryService>,
    pub processor: Arc<ReceiptProcessor>,
    pub sink: BroadcastSink,
    pub metrics: Arc<MetricsRegistry>,
    pub access: Arc<dyn AccessPolicy>,
    pub in_flight: Arc<InFlightTracker>,
}

impl AppState {
    /// State with no supervisor: write failures are handled by the
    /// configured policy alone and nothing cancels backoff.
    pub fn new(store: Arc<dyn ReceiptStore>, config: &ReceiptStoreConfig) -> Self {
        Self::assemble(store, config, None, None, Arc::new(InFlightTracker::new()))
    }

    /// State whose writer reports fatal failures to `failures` and stops
    /// retrying once `coordinator` shuts down.
    pub fn supervised(
        store: Arc<dyn ReceiptStore>,
        config: &ReceiptStoreConfig,
        coordinator: &ShutdownCoordinator,
        failures: mpsc::UnboundedSender<WriteError>,
    ) -> Self {
        Self::assemble(
            store,
            config,
            Some(coordinator.signal()),
            Some(failures),
            coordinator.in_flight(),
        )
    }

    pub fn with_access(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReceiptStore> {
        self.query.store()
    }

    fn assemble(
        store: Arc<dyn ReceiptStore>,
        config: &ReceiptStoreConfig,
        shutdown: Option<ShutdownSignal>,
        failures: Option<mpsc::UnboundedSender<WriteError>>,
        in_flight: Arc<InFlightTracker>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let sink = BroadcastSink::default();

        let mut writer = ReliableWriter::new(
            store.clone(),
            Arc::new(sink.clone()),
            config.retry.clone(),
        )
        .with_exhaustion_policy(config.on_retry_exhausted, failures)
        .with_in_flight(in_flight.clone())
        .with_metrics(metrics.clone());
        if let Some(signal) = shutdown {
            writer = writer.with_shutdown(signal);
        }

        let processor =
            ReceiptProcessor::new(Arc::new(writer)).with_metrics(metrics.clone());
        let query =
            ReceiptQueryService::new(store, config.query_limit).with_metrics(metrics.clone());

        Self {
            query: Arc::new(query),
            processor: Arc::new(processor),
            sink,
            metrics,
            access: Arc::new(AllowAll),
            in_flight,
        }
    }
}

/// Start the HTTP server.
///
/// Returns an error when a receipt write exhausts its retry budget under the
/// fatal policy, after draining the remaining writes.
pub async fn run() -> anyhow::Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("failed to initialise logging")?;

    info!(
        "Starting {} v{}",
        telemetry.service_name, telemetry.service_version
    );

    let config = Config::from_env().context("invalid configuration")?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Receipt backend: {}", config.receipts.backend.name());
    info!("  Retry exhaustion policy: {}", config.receipts.on_retry_exhausted);

    let store = open_store(&config.receipts)
        .await
        .context("failed to open receipt store")?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();

    let state = AppState::supervised(store.clone(), &config.receipts, &coordinator, failures_tx)
        .with_access(policy_from_env());

    let app = build_router(state)?;

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            coordinator.shutdown().await;
        });
    }

    info!("Receipt gateway is ready to accept connections");
    let serve = serve_with_shutdown(listener, app, coordinator.clone(), config.shutdown);
    tokio::pin!(serve);

    let mut fatal: Option<WriteError> = None;
    loop {
        tokio::select! {
            result = &mut serve => {
                result.context("HTTP server failed")?;
                break;
            }
            Some(err) = failures_rx.recv(), if fatal.is_none() => {
                error!(id = %err.id(), error = %err, "Receipt write failed permanently, shutting down");
                fatal = Some(err);
                coordinator.shutdown().await;
            }
        }
    }

    // Failures reported while draining
    while let Ok(err) = failures_rx.try_recv() {
        error!(id = %err.id(), error = %err, "Receipt write failed during shutdown");
        fatal.get_or_insert(err);
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close receipt store cleanly");
    }

    match fatal {
        Some(err) => Err(anyhow::Error::new(err).context("receipt write path failed")),
        None => {
            info!("Receipt gateway stopped");
            Ok(())
        }
    }
}

/// Assemble the full router with state applied.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .merge(crate::api::compat_router())
        .nest("/api", crate::api::router())
        .route("/ws", get(receipts_ws))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}
