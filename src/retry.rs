//! Retry logic with exponential backoff
//!
//! Used by the downloader adapters for transient request failures, so a
//! `Transport` error only surfaces after the retry budget is exhausted.
//! Backoff doubles per attempt up to a cap, with optional jitter to avoid
//! thundering herds against a recovering server.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Retry behavior for a downloader adapter
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 500ms)
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay (default: 10s)
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay (default: true)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..=0.5);
            exp.mul_f64(1.0 + extra).min(self.max_delay.mul_f64(1.5))
        } else {
            exp
        }
    }
}

/// Trait for errors that can be classified as retryable or not.
///
/// Transient failures (timeouts, connection resets) should return `true`;
/// permanent ones (bad configuration, missing rows, cancellation) `false`.
pub trait IsRetryable {
    /// Returns true if the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Transport(msg) => {
                msg.contains("timeout") || msg.contains("connection") || msg.contains("503")
            }
            _ => false,
        }
    }
}

/// Execute `op` with exponential backoff, retrying while the error is
/// retryable and attempts remain.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: IsRetryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts.max(1) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
