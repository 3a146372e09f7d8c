// ABOUTME: Peer-count health sampling with adaptive cadence
// ABOUTME: Emits a debounced link-lost signal when peers drop to zero

use crate::config::MonitorConfig;
use std::time::Duration;
use tokio::time::Instant;

/// One peer-count observation. Transient, consumed only by the session loop.
#[derive(Debug, Clone, Copy)]
pub struct PeerSample {
    pub count: usize,
    pub observed_at: Instant,
}

/// Decides the sampling cadence and turns zero-peer samples into at most one
/// link-lost signal per connected epoch.
///
/// Sampling starts fast after a connect so a bad link is caught quickly, then
/// relaxes once the settle window has passed. Query failures never reach
/// `observe`; the session logs them and treats the cycle as missed.
pub struct PeerMonitor {
    fast_interval: Duration,
    settle_window: Duration,
    steady_interval: Duration,
    connected_at: Option<Instant>,
    armed: bool,
}

impl PeerMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            fast_interval: config.fast_interval(),
            settle_window: config.settle_window(),
            steady_interval: config.steady_interval(),
            connected_at: None,
            armed: false,
        }
    }

    /// Re-arms the link-lost signal. Called on every Connected transition.
    pub fn on_connected(&mut self) {
        self.connected_at = Some(Instant::now());
        self.armed = true;
    }

    pub fn on_disconnected(&mut self) {
        self.connected_at = None;
        self.armed = false;
    }

    /// Delay until the next sample: fast during the settle window, steady after.
    pub fn next_interval(&self) -> Duration {
        match self.connected_at {
            Some(connected_at) if connected_at.elapsed() < self.settle_window => {
                self.fast_interval
            }
            _ => self.steady_interval,
        }
    }

    /// Returns true when this sample means the link was lost. Fires at most
    /// once per connected epoch; repeated zero samples stay silent until a
    /// fresh `on_connected` re-arms the signal.
    pub fn observe(&mut self, sample: PeerSample) -> bool {
        if sample.count == 0 && self.armed {
            self.armed = false;
            tracing::info!("Peer count dropped to zero, link lost");
            return true;
        }
        if sample.count > 0 {
            tracing::debug!(peers = sample.count, "Peer sample");
        }
        false
    }
}
