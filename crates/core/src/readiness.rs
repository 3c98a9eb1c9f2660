//! Bounded polling and retry
//!
//! [`ReadinessGate`] answers "does condition C hold within N attempts,
//! sleeping S between attempts?". Every component that waits on something
//! uses it: the display supervisor polls ports and liveness with it, and the
//! extension installer drives its single retry through it.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// Attempt ceiling and pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Total number of attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts
    pub interval: Duration,
}

impl GateConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    fn ceiling(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// Result of polling a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    /// Whether the condition held before the ceiling was reached
    pub ready: bool,
    /// Attempts actually made (1-based count)
    pub attempts: u32,
    /// Wall time spent polling
    pub elapsed: Duration,
}

/// Result of retrying a fallible operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result: the first success, or the last failure
    pub result: Result<T, E>,
    /// Attempts actually made (1-based count)
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Generic bounded polling primitive
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    label: String,
    config: GateConfig,
}

impl ReadinessGate {
    /// Create a gate; `label` names what is being waited on in logs
    pub fn new(label: impl Into<String>, config: GateConfig) -> Self {
        Self {
            label: label.into(),
            config,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// Poll `probe` until it returns true or the attempt ceiling is reached.
    ///
    /// No sleep happens after the final attempt.
    #[instrument(level = "debug", skip(self, probe), fields(gate = %self.label))]
    pub async fn wait_for<F, Fut>(&self, mut probe: F) -> GateOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        let ceiling = self.config.ceiling();

        for attempt in 1..=ceiling {
            if probe().await {
                debug!("{} ready after {} attempt(s)", self.label, attempt);
                return GateOutcome {
                    ready: true,
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }

            if attempt < ceiling {
                debug!(
                    "{} not ready (attempt {}/{}), sleeping {:?}",
                    self.label, attempt, ceiling, self.config.interval
                );
                tokio::time::sleep(self.config.interval).await;
            }
        }

        warn!("{} not ready after {} attempts", self.label, ceiling);
        GateOutcome {
            ready: false,
            attempts: ceiling,
            elapsed: start.elapsed(),
        }
    }

    /// Run `operation` until it succeeds or the attempt ceiling is reached,
    /// sleeping the configured interval after each failure except the last.
    ///
    /// `on_failure` sees every failed attempt number and its error, which
    /// lets callers record per-attempt outcomes.
    #[instrument(level = "debug", skip(self, operation, on_failure), fields(gate = %self.label))]
    pub async fn retry<T, E, F, Fut, L>(&self, mut operation: F, mut on_failure: L) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        L: FnMut(u32, &E),
        E: std::fmt::Display,
    {
        let ceiling = self.config.ceiling();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", self.label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    on_failure(attempt, &error);
                    if attempt >= ceiling {
                        warn!(
                            "{} failed after {} attempt(s): {}",
                            self.label, attempt, error
                        );
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }
                    warn!(
                        "{} failed on attempt {}/{}: {}; retrying in {:?}",
                        self.label, attempt, ceiling, error, self.config.interval
                    );
                    tokio::time::sleep(self.config.interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Whether something is accepting TCP connections at `addr`
pub async fn port_accepting(addr: SocketAddr, connect_timeout: Duration) -> bool {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("Connect to {} failed: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Connect to {} timed out after {:?}", addr, connect_timeout);
            false
        }
    }
}
