// ABOUTME: Delivery-mode adapters: push subscription and interval polling
// ABOUTME: Both feed the same wire-message batches so the session is mode-agnostic

use crate::message::{Topic, WireMessage};
use crate::traits::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const BATCH_CHANNEL_CAPACITY: usize = 32;

/// A running ingestion adapter for one connected epoch.
///
/// `recv` yields batches of raw wire messages; `None` means the underlying
/// source failed (push channel closed) and the session should reconnect.
/// The adapter task is tied to the session's cancellation token and is
/// additionally aborted by `shutdown` when the epoch ends.
pub struct IngestSource {
    rx: mpsc::Receiver<Vec<WireMessage>>,
    task: JoinHandle<()>,
}

impl IngestSource {
    /// Push mode: forward each subscription message as a single-item batch.
    pub fn push(mut subscription: mpsc::Receiver<WireMessage>, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    inbound = subscription.recv() => match inbound {
                        Some(wire) => {
                            if tx.send(vec![wire]).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::warn!("Push subscription closed by transport");
                            break;
                        }
                    },
                }
            }
        });
        Self { rx, task }
    }

    /// Poll mode: fetch all pending messages on a fixed interval. Fetch
    /// failures are logged as a missed cycle, never a session failure.
    pub fn poll<T: Transport>(
        transport: Arc<T>,
        handle: T::Handle,
        topic: Topic,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut next_fetch = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(next_fetch) => {}
                }
                next_fetch += interval;

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fetched = transport.fetch_pending(&handle, &topic) => fetched,
                };
                match fetched {
                    Ok(batch) if batch.is_empty() => {}
                    Ok(batch) => {
                        if tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Fetch failed, skipping cycle");
                    }
                }
            }
        });
        Self { rx, task }
    }

    pub async fn recv(&mut self) -> Option<Vec<WireMessage>> {
        self.rx.recv().await
    }

    /// Stop the adapter task before leaving the connected epoch.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
