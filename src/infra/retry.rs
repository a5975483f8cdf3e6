//! Retry utilities with exponential backoff and a cumulative time budget
//!
//! Backoff sleeps are raced against a [`ShutdownSignal`] so a retry loop can
//! be abandoned cleanly when the process stops.

use std::future::Future;
use std::time::{Duration, Instant};

use super::graceful_shutdown::ShutdownSignal;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default growth factor applied to the delay after each failed attempt
pub const DEFAULT_MULTIPLIER: f64 = 1.1;

/// Default cumulative retry budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Option<Duration>,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Give up once this much time has elapsed since the first attempt
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: None,
            multiplier: DEFAULT_MULTIPLIER,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RetryConfig {
    /// Create a config for fast retries (tests, in-memory backends)
    pub fn fast() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Some(Duration::from_millis(50)),
            multiplier: 2.0,
            timeout: Duration::from_secs(2),
        }
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the cumulative timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Calculate delay for a given retry (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = match self.max_delay {
            Some(max) => base.min(max.as_secs_f64()),
            None => base,
        };
        Duration::try_from_secs_f64(capped).unwrap_or(Duration::MAX)
    }
}

/// What the retried operation decided about one attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished, stop retrying
    Done(T),
    /// Failed transiently, retry after backoff
    Retry(E),
    /// Failed permanently, stop without retrying
    Abort(E),
}

/// Successful result of a retry loop
#[derive(Debug)]
pub struct RetryResult<T> {
    pub value: T,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
    /// Total time spent including delays
    pub total_duration: Duration,
}

/// Why a retry loop gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The cumulative timeout elapsed; carries the last failure
    Exhausted {
        last_error: E,
        attempts: u32,
        elapsed: Duration,
    },
    /// The operation reported a permanent failure
    Aborted { error: E, attempts: u32 },
    /// Shutdown was signalled during a backoff sleep
    Cancelled { attempts: u32 },
}

/// A retry executor that runs operations until they finish, abort, run out of
/// time, or are cancelled by shutdown.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
    shutdown: Option<ShutdownSignal>,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            shutdown: None,
        }
    }

    /// Abort backoff sleeps when `signal` fires
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` with retry logic and context logging.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn run<F, Fut, T, E>(
        &self,
        context: &str,
        mut operation: F,
    ) -> Result<RetryResult<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            if self.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }
            attempts += 1;

            match operation(attempts).await {
                Attempt::Done(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context = context,
                            attempts = attempts,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(RetryResult {
                        value,
                        attempts,
                        total_duration: start.elapsed(),
                    });
                }
                Attempt::Abort(error) => {
                    return Err(RetryError::Aborted { error, attempts });
                }
                Attempt::Retry(error) => {
                    let elapsed = start.elapsed();
                    if elapsed > self.config.timeout {
                        tracing::error!(
                            context = context,
                            attempts = attempts,
                            error = %error,
                            duration_ms = elapsed.as_millis() as u64,
                            "Operation failed after retry budget exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            last_error: error,
                            attempts,
                            elapsed,
                        });
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::warn!(
                        context = context,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, will retry"
                    );

                    if !self.sleep(delay).await {
                        tracing::info!(
                            context = context,
                            attempts = attempts,
                            "Retry loop cancelled by shutdown"
                        );
                        return Err(RetryError::Cancelled { attempts });
                    }
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_shutdown())
    }

    /// Returns false if shutdown interrupted the sleep
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.shutdown {
            Some(signal) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = signal.wait() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
