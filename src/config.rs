// ABOUTME: Session configuration with serde defaults and validation
// ABOUTME: Hosts construct this directly or deserialize it from their own config layer

use crate::message::Topic;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How inbound messages reach the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Transport invokes a registered subscription as messages arrive.
    #[default]
    Push,
    /// Session fetches batches of pending messages on a fixed interval.
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Topic the session listens on.
    pub inbound_topic: Topic,
    /// Topic replies are published to. Must differ from the inbound topic.
    pub outbound_topic: Topic,
    #[serde(default)]
    pub delivery: DeliveryMode,
    /// Fixed backoff before retrying after a failed connection attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Fetch cadence in poll mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Whether accepted inbound messages feed the responder pipeline.
    #[serde(default = "default_true")]
    pub auto_reply: bool,
    /// Optional greeting published on the outbound topic after each connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<String>,
}

impl SessionConfig {
    pub fn new(inbound_topic: impl Into<Topic>, outbound_topic: impl Into<Topic>) -> Self {
        Self {
            inbound_topic: inbound_topic.into(),
            outbound_topic: outbound_topic.into(),
            delivery: DeliveryMode::default(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            publish: PublishConfig::default(),
            dedup: DedupConfig::default(),
            monitor: MonitorConfig::default(),
            auto_reply: default_true(),
            announce: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbound_topic == self.outbound_topic {
            anyhow::bail!("inbound and outbound topics must differ");
        }
        if self.publish.max_attempts == 0 {
            anyhow::bail!("publish.max_attempts must be at least 1");
        }
        if self.dedup.capacity == 0 {
            anyhow::bail!("dedup.capacity must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be nonzero");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bounded-attempt retry settings for outbound publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Suspension between attempts. No delay after the final attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl PublishConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Size and age bounds for the seen-message set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Oldest-inserted entries are evicted above this ceiling.
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
    /// Optional retention window; entries older than this are expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_ms: Option<u64>,
}

impl DedupConfig {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_ms.map(Duration::from_millis)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_dedup_capacity(),
            retention_ms: None,
        }
    }
}

/// Peer sampling cadence: fast right after connecting, relaxed once settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
    #[serde(default = "default_steady_interval_ms")]
    pub steady_interval_ms: u64,
}

impl MonitorConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn steady_interval(&self) -> Duration {
        Duration::from_millis(self.steady_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval_ms(),
            settle_window_ms: default_settle_window_ms(),
            steady_interval_ms: default_steady_interval_ms(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_dedup_capacity() -> usize {
    1024
}

fn default_fast_interval_ms() -> u64 {
    1000
}

fn default_settle_window_ms() -> u64 {
    10_000
}

fn default_steady_interval_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}
