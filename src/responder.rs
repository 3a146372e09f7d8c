// ABOUTME: Auto-reply pipeline: generate a response and republish it
// ABOUTME: A single-slot pending guard bounds generation to one cycle at a time

use crate::message::{Message, Topic};
use crate::publisher::RetryingPublisher;
use crate::traits::{Responder, Transport};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consumes accepted inbound messages and publishes generated replies.
///
/// At most one generation+publish cycle runs at a time per session; messages
/// arriving while a cycle is pending are simply not auto-replied (they still
/// reach dedup and observers). Failures end the cycle silently: no reply is
/// sent, the error is logged.
pub struct ResponderPipeline<T: Transport> {
    responder: Arc<dyn Responder>,
    publisher: RetryingPublisher<T>,
    outbound_topic: Topic,
    pending: Arc<AtomicBool>,
}

impl<T: Transport> ResponderPipeline<T> {
    pub fn new(
        responder: Arc<dyn Responder>,
        publisher: RetryingPublisher<T>,
        outbound_topic: Topic,
    ) -> Self {
        Self {
            responder,
            publisher,
            outbound_topic,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Claim the pending slot and build the reply cycle for this message.
    /// Returns `None` when a cycle is already in flight.
    ///
    /// The returned future is spawned by the session loop so ingestion keeps
    /// flowing while generation runs; the guard clears the slot on every exit
    /// path, including task abort.
    pub fn begin(&self, msg: &Message) -> Option<impl Future<Output = ()> + Send + 'static> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(
                timestamp = msg.timestamp,
                "Generation already pending, skipping auto-reply"
            );
            return None;
        }

        let guard = PendingGuard(Arc::clone(&self.pending));
        let responder = Arc::clone(&self.responder);
        let publisher = self.publisher.clone();
        let outbound_topic = self.outbound_topic.clone();
        let prompt = msg.text().into_owned();

        Some(async move {
            let _guard = guard;
            match responder.generate(&prompt).await {
                Ok(reply) => {
                    if !publisher
                        .publish(&outbound_topic, reply.as_bytes())
                        .await
                    {
                        tracing::warn!(topic = %outbound_topic, "Auto-reply publish failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Generation failed, skipping reply");
                }
            }
        })
    }
}

struct PendingGuard(Arc<AtomicBool>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
