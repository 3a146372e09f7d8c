// ABOUTME: Scriptable mock collaborators for deterministic tests
// ABOUTME: MockTransport and MockResponder, no real network or model involved

use crate::error::{GenerationError, TransportError};
use crate::message::{Topic, WireMessage};
use crate::traits::{Capability, Responder, Transport};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory transport with scripted failures.
///
/// Builder methods (consumed before sharing) script failures; `&self`
/// methods inject messages and inspect what the session did. All counters
/// are cumulative across reconnects.
pub struct MockTransport {
    capabilities: HashSet<Capability>,
    acquire_failures: AtomicUsize,
    subscribe_failures: AtomicUsize,
    publish_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
    publish_attempt_count: AtomicUsize,
    published_messages: Mutex<Vec<(Topic, Vec<u8>)>>,
    peer_count_script: Mutex<VecDeque<Result<usize, ()>>>,
    default_peer_count: AtomicUsize,
    fetch_queue: Mutex<VecDeque<Vec<WireMessage>>>,
    push_sender: Mutex<Option<mpsc::Sender<WireMessage>>>,
    acquire_count: AtomicUsize,
    release_count: AtomicUsize,
    subscribe_count: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            capabilities: HashSet::from([Capability::Publish, Capability::Subscribe]),
            acquire_failures: AtomicUsize::new(0),
            subscribe_failures: AtomicUsize::new(0),
            publish_failures: AtomicUsize::new(0),
            fetch_failures: AtomicUsize::new(0),
            publish_attempt_count: AtomicUsize::new(0),
            published_messages: Mutex::new(Vec::new()),
            peer_count_script: Mutex::new(VecDeque::new()),
            default_peer_count: AtomicUsize::new(3),
            fetch_queue: Mutex::new(VecDeque::new()),
            push_sender: Mutex::new(None),
            acquire_count: AtomicUsize::new(0),
            release_count: AtomicUsize::new(0),
            subscribe_count: AtomicUsize::new(0),
        }
    }

    /// Drop a capability from the acquired handle.
    pub fn without_capability(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    /// Fail the next `n` acquire calls.
    pub fn fail_acquires(self, n: usize) -> Self {
        self.acquire_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` subscribe calls.
    pub fn fail_subscribes(self, n: usize) -> Self {
        self.subscribe_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` publish attempts.
    pub fn fail_publishes(self, n: usize) -> Self {
        self.publish_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` fetch calls.
    pub fn fail_fetches(self, n: usize) -> Self {
        self.fetch_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Script the next peer-count answers; once drained, the default (3)
    /// is returned.
    pub fn peer_counts(self, counts: impl IntoIterator<Item = usize>) -> Self {
        self.peer_count_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(counts.into_iter().map(Ok));
        self
    }

    /// Script a peer-count query error.
    pub fn peer_count_error(self) -> Self {
        self.peer_count_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(()));
        self
    }

    /// Queue one batch to be returned by the next fetch (poll mode).
    pub fn enqueue_fetch(&self, batch: Vec<WireMessage>) {
        self.fetch_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(batch);
    }

    /// Deliver a message through the active push subscription.
    pub async fn push(&self, wire: WireMessage) {
        let sender = self
            .push_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .expect("no active subscription");
        sender.send(wire).await.expect("subscription receiver gone");
    }

    /// Close the active push subscription, simulating transport failure.
    pub fn close_push(&self) {
        self.push_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn published(&self) -> Vec<(Topic, Vec<u8>)> {
        self.published_messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn publish_attempts(&self) -> usize {
        self.publish_attempt_count.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquire_count.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    fn consume_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Handle = ();

    async fn acquire(&self) -> Result<Self::Handle, TransportError> {
        if Self::consume_failure(&self.acquire_failures) {
            return Err(TransportError::Acquisition("scripted failure".to_string()));
        }
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_capability(&self, _handle: &Self::Handle, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    async fn subscribe(
        &self,
        _handle: &Self::Handle,
        _topic: &Topic,
    ) -> Result<mpsc::Receiver<WireMessage>, TransportError> {
        if Self::consume_failure(&self.subscribe_failures) {
            return Err(TransportError::Subscription("scripted failure".to_string()));
        }
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self
            .push_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn publish_once(
        &self,
        _handle: &Self::Handle,
        topic: &Topic,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.publish_attempt_count.fetch_add(1, Ordering::SeqCst);
        if Self::consume_failure(&self.publish_failures) {
            return Err(TransportError::Publish("scripted failure".to_string()));
        }
        self.published_messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.clone(), payload.to_vec()));
        Ok(())
    }

    async fn fetch_pending(
        &self,
        _handle: &Self::Handle,
        _topic: &Topic,
    ) -> Result<Vec<WireMessage>, TransportError> {
        if Self::consume_failure(&self.fetch_failures) {
            return Err(TransportError::Fetch("scripted failure".to_string()));
        }
        Ok(self
            .fetch_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default())
    }

    async fn peer_count(&self, _handle: &Self::Handle) -> Result<usize, TransportError> {
        let scripted = self
            .peer_count_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(Ok(count)) => Ok(count),
            Some(Err(())) => Err(TransportError::Query("scripted failure".to_string())),
            None => Ok(self.default_peer_count.load(Ordering::SeqCst)),
        }
    }

    async fn release(&self, _handle: Self::Handle) {
        self.release_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted generation collaborator. Replies are consumed in order; once
/// drained it echoes the prompt.
pub struct MockResponder {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.to_string()));
        self
    }

    /// Make every generation take this long, for in-flight bounding tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(GenerationError::new(message)),
            None => Ok(format!("re: {}", prompt)),
        }
    }
}
