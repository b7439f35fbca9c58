//! Outbound service errors

use std::time::Duration;

use thiserror::Error;

/// Failure of a call to an external service (ASR, TTS, LLM)
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Breaker is open; no network attempt was made
    #[error("circuit breaker open for {service}")]
    CircuitOpen {
        /// Adapter whose breaker rejected the call
        service: String,
    },

    /// Call exceeded its hard deadline
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Service answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Connection-level failure (refused, reset, per-request timeout)
    #[error("network error: {0}")]
    Network(String),

    /// Retryable failure persisted through every attempt
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Failure of the final attempt
        #[source]
        source: Box<ServiceError>,
    },

    /// Response could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// Caller supplied unusable input; never retried
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller abandoned the call
    #[error("call cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Whether this failure should count against the circuit breaker
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::InvalidInput(_) | Self::Cancelled | Self::CircuitOpen { .. })
    }

    /// Status code if the service answered
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Innermost cause, unwrapping retry exhaustion
    #[must_use]
    pub fn root_cause(&self) -> &ServiceError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_and_status() {
        let err = ServiceError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ServiceError::Status {
                status: 503,
                body: "busy".to_string(),
            }),
        };
        assert_eq!(err.status(), Some(503));
        assert!(matches!(err.root_cause(), ServiceError::Status { status: 503, .. }));
        assert_eq!(err.to_string(), "giving up after 4 attempts: HTTP 503: busy");
    }

    #[test]
    fn test_failure_accounting() {
        assert!(ServiceError::Network("reset".into()).counts_as_failure());
        assert!(ServiceError::Timeout(Duration::from_secs(1)).counts_as_failure());
        assert!(!ServiceError::InvalidInput("empty".into()).counts_as_failure());
        assert!(!ServiceError::Cancelled.counts_as_failure());
    }
}
