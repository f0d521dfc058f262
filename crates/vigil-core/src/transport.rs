// ── Transport seam ──
//
// The registry talks to the bus through this trait so it can be driven
// by the real `BusConnection` or by an in-memory double. All methods are
// synchronous: outbound frames are queued, never awaited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use vigil_api::{BusConnection, BusMessage, ClientFrame, LinkState};

use crate::error::CoreError;
use crate::topic::Topic;

const MEMORY_INBOUND_CAPACITY: usize = 256;

/// Wire-level operations the topic registry needs.
pub trait Transport: Send + Sync + 'static {
    /// Queue a subscribe. Returns the link generation it was sent on, or
    /// `None` if the link is down.
    fn subscribe(&self, topic: &Topic) -> Option<u64>;

    /// Queue an unsubscribe. No-op while the link is down.
    fn unsubscribe(&self, topic: &Topic);

    /// Publish a command payload. Fails with [`CoreError::NotConnected`]
    /// while the link is not open.
    fn publish(&self, topic: &Topic, payload: &serde_json::Value) -> Result<(), CoreError>;

    fn state(&self) -> watch::Receiver<LinkState>;

    /// Counter bumped on every successful (re)connect.
    fn generation(&self) -> u64;

    /// All inbound messages, across every topic.
    fn inbound(&self) -> broadcast::Receiver<Arc<BusMessage>>;

    /// Why the last connection attempt failed, while the link is down.
    fn last_error(&self) -> Option<Arc<vigil_api::Error>> {
        None
    }

    fn shutdown(&self);
}

impl Transport for BusConnection {
    fn subscribe(&self, topic: &Topic) -> Option<u64> {
        self.subscribe_topic(topic.as_str())
    }

    fn unsubscribe(&self, topic: &Topic) {
        self.unsubscribe_topic(topic.as_str());
    }

    fn publish(&self, topic: &Topic, payload: &serde_json::Value) -> Result<(), CoreError> {
        BusConnection::publish(self, topic.as_str(), payload.clone()).map_err(|e| match e {
            vigil_api::Error::NotConnected => CoreError::NotConnected {
                topic: topic.to_string(),
            },
            other => other.into(),
        })
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        BusConnection::state(self)
    }

    fn generation(&self) -> u64 {
        BusConnection::generation(self)
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        BusConnection::inbound(self)
    }

    fn last_error(&self) -> Option<Arc<vigil_api::Error>> {
        BusConnection::last_error(self)
    }

    fn shutdown(&self) {
        BusConnection::shutdown(self);
    }
}

// ── MemoryTransport ─────────────────────────────────────────────────

/// In-process transport that records outbound frames and lets the caller
/// drive link state and inbound traffic by hand.
///
/// Used by the registry and hub tests, and handy for exercising channel
/// consumers without a bus.
pub struct MemoryTransport {
    frames: Mutex<Vec<ClientFrame>>,
    state: watch::Sender<LinkState>,
    generation: AtomicU64,
    inbound: broadcast::Sender<Arc<BusMessage>>,
    last_error: Mutex<Option<Arc<vigil_api::Error>>>,
}

impl MemoryTransport {
    /// A transport whose link is already open (generation 1).
    pub fn new() -> Self {
        let transport = Self::offline();
        transport.reopen();
        transport
    }

    /// A transport that has not connected yet.
    pub fn offline() -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        let (inbound, _) = broadcast::channel(MEMORY_INBOUND_CAPACITY);
        Self {
            frames: Mutex::new(Vec::new()),
            state,
            generation: AtomicU64::new(0),
            inbound,
            last_error: Mutex::new(None),
        }
    }

    /// Simulate a dropped link.
    pub fn drop_link(&self) {
        self.state.send_replace(LinkState::Retrying { attempt: 1 });
    }

    /// Simulate a failed connection attempt. Credential rejections close
    /// the link for good; anything else leaves it retrying.
    pub fn fail(&self, err: vigil_api::Error) {
        let terminal = err.is_auth();
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(err));
        if terminal {
            self.state.send_replace(LinkState::Closed);
        } else {
            self.state.send_replace(LinkState::Retrying { attempt: 1 });
        }
    }

    /// Simulate a successful (re)connect: bump the generation, then open.
    pub fn reopen(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(LinkState::Open);
    }

    /// Deliver a value as if the bus had published it.
    pub fn inject(&self, topic: &str, payload: serde_json::Value) {
        let _ = self.inbound.send(Arc::new(BusMessage {
            topic: topic.to_owned(),
            payload,
            retain: false,
        }));
    }

    /// Every frame sent so far, oldest first.
    pub fn frames(&self) -> Vec<ClientFrame> {
        self.lock_frames().clone()
    }

    /// Drain the recorded frames.
    pub fn take_frames(&self) -> Vec<ClientFrame> {
        std::mem::take(&mut *self.lock_frames())
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.count(|f| matches!(f, ClientFrame::Subscribe { topic: t } if t == topic))
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.count(|f| matches!(f, ClientFrame::Unsubscribe { topic: t } if t == topic))
    }

    /// Published (topic, payload) pairs, oldest first.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.lock_frames()
            .iter()
            .filter_map(|f| match f {
                ClientFrame::Publish { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ClientFrame) -> bool) -> usize {
        self.lock_frames().iter().filter(|f| pred(f)).count()
    }

    fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    fn record(&self, frame: ClientFrame) {
        self.lock_frames().push(frame);
    }

    fn lock_frames(&self) -> std::sync::MutexGuard<'_, Vec<ClientFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&self, topic: &Topic) -> Option<u64> {
        if !self.is_open() {
            return None;
        }
        self.record(ClientFrame::Subscribe {
            topic: topic.to_string(),
        });
        Some(self.generation())
    }

    fn unsubscribe(&self, topic: &Topic) {
        if self.is_open() {
            self.record(ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
    }

    fn publish(&self, topic: &Topic, payload: &serde_json::Value) -> Result<(), CoreError> {
        if !self.is_open() {
            return Err(CoreError::NotConnected {
                topic: topic.to_string(),
            });
        }
        self.record(ClientFrame::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
            retain: false,
        });
        Ok(())
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.inbound.subscribe()
    }

    fn last_error(&self) -> Option<Arc<vigil_api::Error>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn shutdown(&self) {
        self.state.send_replace(LinkState::Closed);
    }
}
