// ABOUTME: TransportSession state machine and supervising control loop
// ABOUTME: Owns connection lifecycle, reconnection, ingestion, and auto-reply tasks

use crate::config::{DeliveryMode, SessionConfig};
use crate::dedup::DedupStore;
use crate::ingest::IngestSource;
use crate::message::{Message, WireMessage};
use crate::monitor::{PeerMonitor, PeerSample};
use crate::publisher::RetryingPublisher;
use crate::responder::ResponderPipeline;
use crate::traits::{Capability, Responder, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle state. Mutated only by the session's own control
/// loop; observers read it through a watch channel or the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Notifications delivered to the host: state transitions and accepted
/// inbound messages, in dedup acceptance order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    State(SessionState),
    Message(Message),
}

enum ConnectedOutcome {
    Stopped,
    LinkLost,
    SourceClosed,
}

/// A live session against the pub/sub transport.
///
/// `start` spawns a supervising loop that drives the state machine:
/// Connecting acquires the transport and checks capabilities, Connected runs
/// ingestion plus peer monitoring, Error waits out a fixed backoff and tries
/// again (unbounded; transient network conditions are expected to resolve).
/// `stop` cancels everything and guarantees no event fires after it returns.
pub struct TransportSession<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    responder: Option<Arc<dyn Responder>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    run: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl<T: Transport> TransportSession<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Result<Self> {
        config.validate().context("invalid session config")?;
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            transport,
            config,
            responder: None,
            state_tx: Arc::new(state_tx),
            state_rx,
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            run: Mutex::new(RunState::default()),
        })
    }

    /// Attach the generation collaborator for auto-replies. Only consulted
    /// when `auto_reply` is enabled in the config.
    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Take the event receiver. Yields `None` after the first call; one
    /// consumer owns the stream.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Start the control loop. No-op while the session is already running.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if run.task.is_some() {
            tracing::debug!("Session already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        let worker = SessionWorker {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            responder: self.responder.clone(),
            state_tx: Arc::clone(&self.state_tx),
            events_tx: self.events_tx.clone(),
            cancel: cancel.clone(),
        };

        tracing::info!(
            inbound = %self.config.inbound_topic,
            outbound = %self.config.outbound_topic,
            delivery = ?self.config.delivery,
            "Session starting"
        );
        run.cancel = Some(cancel);
        run.task = Some(tokio::spawn(worker.run()));
    }

    /// Stop the session: cancel all timers, the ingestion adapter, and any
    /// in-flight auto-reply, then release the transport. Idempotent. No
    /// event or state callback fires after this returns.
    pub async fn stop(&self) {
        let (cancel, task) = {
            let mut run = self.run.lock().await;
            (run.cancel.take(), run.task.take())
        };
        let (Some(cancel), Some(task)) = (cancel, task) else {
            return;
        };

        cancel.cancel();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Session control loop failed during stop");
            }
        }
        tracing::info!("Session stopped");
    }
}

struct SessionWorker<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    responder: Option<Arc<dyn Responder>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    events_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl<T: Transport> SessionWorker<T> {
    async fn run(self) {
        // Survives reconnects: redelivery after a reconnect is still a duplicate
        let mut dedup = DedupStore::new(&self.config.dedup);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting).await;

            match self.establish().await {
                Ok(Some((handle, source))) => {
                    self.set_state(SessionState::Connected).await;
                    let outcome = self.run_connected(&handle, source, &mut dedup).await;
                    self.transport.release(handle).await;
                    match outcome {
                        ConnectedOutcome::Stopped => break,
                        ConnectedOutcome::LinkLost => {
                            tracing::info!("Reconnecting after link loss");
                        }
                        ConnectedOutcome::SourceClosed => {
                            tracing::info!("Reconnecting after transport failure");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Connection attempt failed");
                    self.set_state(SessionState::Error).await;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }

        // Final transition is observable via the watch only; the event
        // stream is silent once stop is in progress.
        self.state_tx.send_replace(SessionState::Disconnected);
    }

    /// One connection attempt: acquire, verify capabilities, and register
    /// the delivery-mode ingestion source. `Ok(None)` means stop intervened.
    async fn establish(&self) -> Result<Option<(T::Handle, IngestSource)>> {
        let handle = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(None),
            acquired = self.transport.acquire() => {
                acquired.context("transport acquisition failed")?
            }
        };

        for capability in [Capability::Publish, Capability::Subscribe] {
            if !self.transport.has_capability(&handle, capability) {
                self.transport.release(handle).await;
                anyhow::bail!("transport missing required capability: {:?}", capability);
            }
        }

        let source = match self.config.delivery {
            DeliveryMode::Push => {
                let subscription = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.transport.release(handle).await;
                        return Ok(None);
                    }
                    subscribed = self
                        .transport
                        .subscribe(&handle, &self.config.inbound_topic) => {
                        match subscribed {
                            Ok(rx) => rx,
                            Err(e) => {
                                self.transport.release(handle).await;
                                return Err(e).context("subscription registration failed");
                            }
                        }
                    }
                };
                IngestSource::push(subscription, self.cancel.child_token())
            }
            DeliveryMode::Poll => IngestSource::poll(
                Arc::clone(&self.transport),
                handle.clone(),
                self.config.inbound_topic.clone(),
                self.config.poll_interval(),
                self.cancel.child_token(),
            ),
        };

        Ok(Some((handle, source)))
    }

    async fn run_connected(
        &self,
        handle: &T::Handle,
        mut source: IngestSource,
        dedup: &mut DedupStore,
    ) -> ConnectedOutcome {
        let mut monitor = PeerMonitor::new(&self.config.monitor);
        monitor.on_connected();

        let publisher = RetryingPublisher::new(
            Arc::clone(&self.transport),
            handle.clone(),
            &self.config.publish,
        );
        let pipeline = if self.config.auto_reply {
            self.responder.as_ref().map(|responder| {
                ResponderPipeline::new(
                    Arc::clone(responder),
                    publisher.clone(),
                    self.config.outbound_topic.clone(),
                )
            })
        } else {
            None
        };
        let mut replies: JoinSet<()> = JoinSet::new();

        // Best-effort greeting on the outbound topic
        if let Some(announce) = &self.config.announce {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    source.shutdown().await;
                    return ConnectedOutcome::Stopped;
                }
                published = publisher.publish(&self.config.outbound_topic, announce.as_bytes()) => {
                    if !published {
                        tracing::warn!("Announce publish failed");
                    }
                }
            }
        }

        let mut next_sample = Instant::now() + monitor.next_interval();
        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break ConnectedOutcome::Stopped,

                _ = tokio::time::sleep_until(next_sample) => {
                    match self.transport.peer_count(handle).await {
                        Ok(count) => {
                            let sample = PeerSample { count, observed_at: Instant::now() };
                            if monitor.observe(sample) {
                                break ConnectedOutcome::LinkLost;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Peer query failed, treating as unknown");
                        }
                    }
                    next_sample = Instant::now() + monitor.next_interval();
                }

                batch = source.recv() => match batch {
                    Some(wires) => {
                        self.ingest_batch(wires, dedup, pipeline.as_ref(), &mut replies).await;
                    }
                    None => break ConnectedOutcome::SourceClosed,
                },

                Some(finished) = replies.join_next(), if !replies.is_empty() => {
                    if let Err(e) = finished {
                        if !e.is_cancelled() {
                            tracing::error!(error = %e, "Auto-reply task failed");
                        }
                    }
                }
            }
        };

        monitor.on_disconnected();
        replies.shutdown().await;
        source.shutdown().await;
        outcome
    }

    async fn ingest_batch(
        &self,
        wires: Vec<WireMessage>,
        dedup: &mut DedupStore,
        pipeline: Option<&ResponderPipeline<T>>,
        replies: &mut JoinSet<()>,
    ) {
        for wire in wires {
            let msg = match wire.decode() {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable message");
                    continue;
                }
            };
            if !dedup.accept(msg.identity_key()) {
                tracing::debug!(timestamp = msg.timestamp, "Duplicate message dropped");
                continue;
            }
            if let Some(pipeline) = pipeline {
                if let Some(cycle) = pipeline.begin(&msg) {
                    replies.spawn(cycle);
                }
            }
            self.emit(SessionEvent::Message(msg)).await;
        }
    }

    async fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = ?previous, to = ?state, "Session state changed");
            self.emit(SessionEvent::State(state)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = self.events_tx.send(event) => {
                if sent.is_err() {
                    tracing::debug!("Event receiver dropped, discarding event");
                }
            }
        }
    }
}
