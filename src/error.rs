// ABOUTME: Error taxonomy for the transport and generation collaborators
// ABOUTME: Every variant is recoverable by the session layer, never fatal to the process

use thiserror::Error;

/// Failures reported by the pub/sub transport collaborator.
///
/// Acquisition and subscription failures drive the session to `Error` and
/// schedule a reconnect; publish failures are retried locally; fetch and query
/// failures are logged and treated as a missed cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport acquisition failed: {0}")]
    Acquisition(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("peer query failed: {0}")]
    Query(String),
}

/// Failure from the text-generation collaborator. Aborts only the current
/// auto-reply cycle.
#[derive(Debug, Error)]
#[error("generation failed: {0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Acquisition("no bootstrap peers".to_string());
        assert_eq!(
            err.to_string(),
            "transport acquisition failed: no bootstrap peers"
        );

        let err = TransportError::Query("timed out".to_string());
        assert_eq!(err.to_string(), "peer query failed: timed out");
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::new("model unavailable");
        assert_eq!(err.to_string(), "generation failed: model unavailable");
    }
}
