// ABOUTME: Message entities crossing the transport boundary
// ABOUTME: Topic, decoded Message, wire shape, and content-aware identity keys

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Opaque string identifier partitioning the message space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A decoded inbound message. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Vec<u8>,
    /// Epoch millis assigned by the sender.
    pub timestamp: i64,
    pub topic: Topic,
}

impl Message {
    pub fn new(payload: Vec<u8>, timestamp: i64, topic: Topic) -> Self {
        Self {
            payload,
            timestamp,
            topic,
        }
    }

    /// Identity key for deduplication: timestamp + topic + content hash.
    ///
    /// The content hash keeps two senders that collide on a timestamp from
    /// shadowing each other.
    pub fn identity_key(&self) -> IdentityKey {
        let digest = Sha256::digest(&self.payload);
        IdentityKey {
            timestamp: self.timestamp,
            topic: self.topic.clone(),
            content_hash: digest.into(),
        }
    }

    /// Payload as text, for prompt construction and display.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Tuple uniquely distinguishing one logical message from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub timestamp: i64,
    pub topic: Topic,
    pub content_hash: [u8; 32],
}

/// On-wire message shape shared by both delivery models.
///
/// The relay's REST and push surfaces both emit
/// `{ "payload": <base64>, "contentTopic": <string>, "timestamp": <millis> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub payload: String,
    pub content_topic: String,
    pub timestamp: i64,
}

impl WireMessage {
    /// Decode into the common Message entity. Fails on malformed base64;
    /// callers log and drop such messages.
    pub fn decode(&self) -> Result<Message> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .with_context(|| format!("invalid payload on topic {}", self.content_topic))?;
        Ok(Message::new(
            payload,
            self.timestamp,
            Topic::new(&self.content_topic),
        ))
    }

    pub fn from_message(msg: &Message) -> Self {
        Self {
            payload: base64::engine::general_purpose::STANDARD.encode(&msg.payload),
            content_topic: msg.topic.as_str().to_string(),
            timestamp: msg.timestamp,
        }
    }
}
