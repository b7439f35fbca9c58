//! Resilience Wrapper
//!
//! Composable guard around any outbound call: a shared circuit breaker on
//! the outside, a hard per-call deadline inside it, and bounded retry with
//! exponential backoff innermost.
//!
//! ```ignore
//! let asr = Resilience::new("asr", &config.resilience);
//! let text = asr.call(|attempt| async move { post_audio(attempt).await }).await?;
//! ```

pub mod breaker;
pub mod error;
pub mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState, Permit};
pub use error::ServiceError;
pub use retry::{with_backoff, RetryConfig};

/// Settings for one adapter's resilience wrapper
#[derive(Clone, Debug, PartialEq)]
pub struct ResilienceConfig {
    /// Circuit breaker thresholds
    pub breaker: BreakerConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Hard bound on one call including all retries
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ResilienceConfig {
    /// Same policy with a different per-call deadline
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Breaker + deadline + retry decorator, cheap to clone and shared per adapter
#[derive(Clone, Debug)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl Resilience {
    /// Create a wrapper with its own breaker
    pub fn new(service: impl Into<String>, config: &ResilienceConfig) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(service, config.breaker.clone())),
            retry: config.retry.clone(),
            call_timeout: config.call_timeout,
        }
    }

    /// The shared breaker
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Retry policy in effect
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Per-call deadline in effect
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run `op` under the breaker, deadline and retry policy
    ///
    /// `op` receives the attempt number and must rebuild its request each
    /// time (request bodies are not replayable).
    ///
    /// # Errors
    ///
    /// - [`ServiceError::CircuitOpen`] without invoking `op` while the breaker is open
    /// - [`ServiceError::Timeout`] if the deadline passes mid-attempt
    /// - the failure of `op`, or [`ServiceError::RetriesExhausted`] wrapping it
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let permit = self.breaker.try_acquire()?;
        let deadline = Instant::now() + self.call_timeout;

        let result = match tokio::time::timeout_at(deadline, with_backoff(&self.retry, deadline, op))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.call_timeout)),
        };

        match &result {
            Ok(_) => permit.success(),
            Err(err) if err.counts_as_failure() => {
                tracing::debug!(service = %self.breaker.name(), error = %err, "Call failed");
                permit.failure();
            }
            Err(_) => drop(permit),
        }

        result
    }
}
