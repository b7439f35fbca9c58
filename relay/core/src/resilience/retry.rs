//! Bounded Retry with Exponential Backoff

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::error::ServiceError;

/// Retry configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff delay
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add up to 25% jitter to each delay
    pub use_jitter: bool,

    /// Retry on these status codes
    pub retry_status_codes: Vec<u16>,

    /// Retry on connection-level failures
    pub retry_on_connection_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            retry_status_codes: vec![429, 500, 502, 503],
            retry_on_connection_error: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for attempt N (0-indexed)
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let base = self.initial_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            let jitter = rand::random::<f64>() * 0.25;
            capped * (1.0 + jitter)
        } else {
            capped
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(duration_ms as u64)
    }

    /// Check if a status code should be retried
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }

    /// Whether a failure belongs to the retryable set
    #[must_use]
    pub fn is_retryable(&self, err: &ServiceError) -> bool {
        match err {
            ServiceError::Status { status, .. } => self.should_retry_status(*status),
            ServiceError::Network(_) => self.retry_on_connection_error,
            _ => false,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of
/// retries, or the next backoff would end past `deadline`
///
/// `op` receives the 0-indexed attempt number and must build its request from
/// scratch each time. Dropping the returned future cancels any pending
/// backoff sleep.
///
/// # Errors
///
/// Non-retryable failures are returned unchanged. Retryable failures that
/// outlast the budget are wrapped in [`ServiceError::RetriesExhausted`] with
/// the last cause preserved.
pub async fn with_backoff<T, F, Fut>(
    config: &RetryConfig,
    deadline: Instant,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !config.is_retryable(&err) {
            return Err(err);
        }

        let backoff = config.backoff_for_attempt(attempt);
        let wake_at = Instant::now() + backoff;
        if attempt >= config.max_retries || wake_at >= deadline {
            return Err(ServiceError::RetriesExhausted {
                attempts: attempt + 1,
                source: Box::new(err),
            });
        }

        tracing::debug!(
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis(),
            error = %err,
            "Retrying after backoff"
        );
        tokio::time::sleep_until(wake_at).await;
        attempt += 1;
    }
}
