// ABOUTME: Resilient chat relay session layer over a gossip pub/sub transport
// ABOUTME: Provides traits and core logic for any pub/sub backend

pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod message;
pub mod monitor;
pub mod publisher;
pub mod responder;
pub mod session;
pub mod testing;
pub mod traits;

// Re-export core types for convenient access
pub use config::{DedupConfig, DeliveryMode, MonitorConfig, PublishConfig, SessionConfig};
pub use dedup::DedupStore;
pub use error::{GenerationError, TransportError};
pub use message::{IdentityKey, Message, Topic, WireMessage};
pub use monitor::{PeerMonitor, PeerSample};
pub use publisher::RetryingPublisher;
pub use responder::ResponderPipeline;
pub use session::{SessionEvent, SessionState, TransportSession};
pub use traits::{Capability, Responder, Transport};
