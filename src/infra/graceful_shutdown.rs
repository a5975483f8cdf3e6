//! Graceful shutdown handling
//!
//! Provides graceful shutdown support for the gateway:
//! - Signal handling (SIGTERM, SIGINT)
//! - In-flight receipt write draining
//! - Shutdown hooks for resource cleanup

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

/// Shutdown signal that can be cloned and shared
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    watch_rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check if shutdown has been initiated
    pub fn is_shutdown(&self) -> bool {
        *self.watch_rx.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&self) {
        let mut rx = self.watch_rx.clone();
        // A closed channel means the coordinator is gone; treat it as shutdown.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Tracks in-flight receipt writes for graceful draining
#[derive(Debug, Default)]
pub struct InFlightTracker {
    /// Number of active writes
    active: AtomicU64,
    /// Total writes started
    total: AtomicU64,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write starting. The returned guard can move into a task.
    pub fn start(self: &Arc<Self>) -> InFlightGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Wait for all writes to complete
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();

        while self.active_count() > 0 {
            if start.elapsed() > timeout {
                warn!(
                    active = self.active_count(),
                    "Timeout waiting for receipt writes to drain"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        info!("All receipt writes drained");
        true
    }
}

/// Guard that decrements the active count when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Shutdown coordinator that manages graceful shutdown
pub struct ShutdownCoordinator {
    watch_tx: watch::Sender<bool>,
    in_flight: Arc<InFlightTracker>,
    hooks: Mutex<Vec<ShutdownHook>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(false);

        Self {
            watch_tx,
            in_flight: Arc::new(InFlightTracker::new()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Get a shutdown signal that can be cloned
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            watch_rx: self.watch_tx.subscribe(),
        }
    }

    /// Get the in-flight write tracker
    pub fn in_flight(&self) -> Arc<InFlightTracker> {
        self.in_flight.clone()
    }

    /// Register a shutdown hook
    pub async fn register_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.lock().await.push(Box::new(hook));
    }

    /// Initiate shutdown
    pub async fn shutdown(&self) {
        if self.watch_tx.send_replace(true) {
            // Already shutting down
            return;
        }

        info!("Initiating graceful shutdown...");

        let mut hooks = self.hooks.lock().await;
        for hook in hooks.drain(..) {
            hook();
        }
    }

    /// Initiate shutdown and wait for in-flight writes
    pub async fn graceful_shutdown(&self, drain_timeout: Duration) -> bool {
        self.shutdown().await;

        info!(
            active = self.in_flight.active_count(),
            "Waiting for in-flight receipt writes to complete..."
        );

        let drained = self.in_flight.wait_for_drain(drain_timeout).await;
        info!("Graceful shutdown complete");
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        *self.watch_tx.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct GracefulShutdownConfig {
    /// Timeout for draining in-flight writes
    pub drain_timeout: Duration,
    /// Delay before the listener stops (for load balancer health checks)
    pub shutdown_delay: Duration,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            shutdown_delay: Duration::ZERO,
        }
    }
}

impl GracefulShutdownConfig {
    /// Reads `SHUTDOWN_TIMEOUT_SECS` and `SHUTDOWN_DELAY_SECS`
    pub fn from_env() -> Self {
        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        let defaults = Self::default();
        Self {
            drain_timeout: secs("SHUTDOWN_TIMEOUT_SECS").unwrap_or(defaults.drain_timeout),
            shutdown_delay: secs("SHUTDOWN_DELAY_SECS").unwrap_or(defaults.shutdown_delay),
        }
    }
}

/// Serve with graceful shutdown support.
///
/// Stops accepting connections once the coordinator signals, then drains
/// in-flight receipt writes.
pub async fn serve_with_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    coordinator: Arc<ShutdownCoordinator>,
    config: GracefulShutdownConfig,
) -> Result<(), std::io::Error> {
    let signal = coordinator.signal();

    info!("Starting server with graceful shutdown support");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.wait().await;

            if !config.shutdown_delay.is_zero() {
                info!(
                    "Shutdown signal received, waiting {:?} before stopping...",
                    config.shutdown_delay
                );
                tokio::time::sleep(config.shutdown_delay).await;
            }
        })
        .await?;

    coordinator.graceful_shutdown(config.drain_timeout).await;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
