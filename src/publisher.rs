// ABOUTME: Bounded-attempt retry wrapper around the raw publish primitive
// ABOUTME: Fixed backoff between attempts, failure reported as a boolean

use crate::config::PublishConfig;
use crate::message::Topic;
use crate::traits::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Wraps `Transport::publish_once` with bounded retries.
///
/// Never returns an error: callers get a boolean and decide whether to
/// surface the failure to the user.
pub struct RetryingPublisher<T: Transport> {
    transport: Arc<T>,
    handle: T::Handle,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<T: Transport> Clone for RetryingPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            handle: self.handle.clone(),
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
        }
    }
}

impl<T: Transport> RetryingPublisher<T> {
    pub fn new(transport: Arc<T>, handle: T::Handle, config: &PublishConfig) -> Self {
        Self {
            transport,
            handle,
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Attempt the publish up to `max_attempts` times, sleeping `retry_delay`
    /// between attempts (never after the final one). Returns true on the
    /// first success.
    pub async fn publish(&self, topic: &Topic, payload: &[u8]) -> bool {
        for attempt in 1..=self.max_attempts {
            match self
                .transport
                .publish_once(&self.handle, topic, payload)
                .await
            {
                Ok(()) => {
                    tracing::debug!(topic = %topic, attempt, "Published");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        tracing::error!(
            topic = %topic,
            attempts = self.max_attempts,
            "Publish failed, attempts exhausted"
        );
        false
    }
}
