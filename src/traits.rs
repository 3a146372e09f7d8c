// ABOUTME: Collaborator traits consumed by the session layer
// ABOUTME: Transport (pub/sub network) and Responder (text generation)

use crate::error::{GenerationError, TransportError};
use crate::message::{Topic, WireMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport features the session requires after acquisition. Absence of
/// either is fatal to the connection attempt, not to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Publish,
    Subscribe,
}

/// Abstract pub/sub transport surface.
///
/// The wire protocol and peer discovery live entirely behind this trait; the
/// session only publishes, subscribes, fetches, and samples peer counts.
/// One session owns the acquired handle exclusively for the life of a
/// connected epoch and releases it on disconnect.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection handle. Cloned into the publisher and ingestion tasks.
    type Handle: Clone + Send + Sync + 'static;

    async fn acquire(&self) -> Result<Self::Handle, TransportError>;

    fn has_capability(&self, handle: &Self::Handle, capability: Capability) -> bool;

    /// Register a push subscription. Inbound messages arrive on the returned
    /// receiver; the transport closing the channel signals failure.
    async fn subscribe(
        &self,
        handle: &Self::Handle,
        topic: &Topic,
    ) -> Result<mpsc::Receiver<WireMessage>, TransportError>;

    /// Single publish attempt. Retry policy belongs to the caller.
    async fn publish_once(
        &self,
        handle: &Self::Handle,
        topic: &Topic,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Fetch all currently pending messages for a topic (poll mode). The
    /// same message may appear in overlapping windows across fetches.
    async fn fetch_pending(
        &self,
        handle: &Self::Handle,
        topic: &Topic,
    ) -> Result<Vec<WireMessage>, TransportError>;

    async fn peer_count(&self, handle: &Self::Handle) -> Result<usize, TransportError>;

    /// Release the handle. Idempotent.
    async fn release(&self, handle: Self::Handle);
}

/// External text-generation collaborator invoked by the responder pipeline.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
