// ── Typed state channels ──
//
// The per-camera, per-feature handle consumers hold: latest reconciled
// value plus a send operation. Binds on construction, unbinds on drop.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde_json::Value;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::error::CoreError;
use crate::reconcile::{Reconciliation, TopicState};
use crate::registry::Binding;
use crate::topic::{StateValue, TopicKey};

/// A bound, typed view of one camera feature.
///
/// ```rust,ignore
/// let mut detect = hub.detect_state("front_door")?;
/// if let Some(current) = detect.wait_for_value().await {
///     detect.send(current.toggled())?;
/// }
/// ```
pub struct StateChannel<T: StateValue> {
    key: TopicKey,
    binding: Binding,
    _value: PhantomData<fn() -> T>,
}

impl<T: StateValue> StateChannel<T> {
    pub(crate) fn new(key: TopicKey, binding: Binding) -> Self {
        Self {
            key,
            binding,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Latest reconciled value, or `None` before the first message.
    pub fn current_value(&self) -> Option<T> {
        self.binding
            .with_state(|state| state.displayed.as_ref().and_then(|v| decode(&self.key, v)))
    }

    /// Last value the backend reported, ignoring any pending command.
    pub fn authoritative_value(&self) -> Option<T> {
        self.binding
            .with_state(|state| state.authoritative.as_ref().and_then(|v| decode(&self.key, v)))
    }

    /// Typed view of the full reconciled state.
    pub fn snapshot(&self) -> ChannelState<T> {
        ChannelState::from_topic_state(&self.key, &self.binding.state())
    }

    /// Untyped reconciled state.
    pub fn state(&self) -> TopicState {
        self.binding.state()
    }

    /// Whether a sent value is still awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        self.binding.state().is_pending()
    }

    pub fn last_outcome(&self) -> Option<Reconciliation> {
        self.binding.state().last_outcome
    }

    /// Request `value`. Displayed immediately and published to the
    /// feature's command topic; fails only if the value cannot be sent.
    pub fn send(&self, value: T) -> Result<(), CoreError> {
        let payload = serde_json::to_value(&value).map_err(|e| CoreError::Encode {
            topic: self.key.command_topic().to_string(),
            message: e.to_string(),
        })?;
        self.binding.send(payload).map(|_| ())
    }

    /// Wait for the next change. Returns `None` once the topic is gone
    /// (registry dropped).
    pub async fn changed(&mut self) -> Option<ChannelState<T>> {
        let receiver = self.binding.receiver_mut();
        receiver.changed().await.ok()?;
        let state = receiver.borrow_and_update().clone();
        Some(ChannelState::from_topic_state(&self.key, &state))
    }

    /// Resolve with the first known value, immediately if one is cached.
    pub async fn wait_for_value(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.current_value() {
                return Some(value);
            }
            self.binding.receiver_mut().changed().await.ok()?;
        }
    }

    /// Convert into a `Stream` of reconciled states, starting with the
    /// current one. Keeps the binding alive for as long as it is polled.
    pub fn into_stream(self) -> ChannelStream<T> {
        let inner = WatchStream::new(self.binding.receiver());
        ChannelStream {
            key: self.key,
            inner,
            _binding: self.binding,
            _value: PhantomData,
        }
    }
}

impl<T: StateValue> std::fmt::Debug for StateChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChannel")
            .field("key", &self.key)
            .field("binding", &self.binding)
            .finish()
    }
}

// ── ChannelState ────────────────────────────────────────────────────

/// Typed snapshot of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState<T> {
    /// Displayed value: pending command if any, else last authoritative.
    pub value: Option<T>,
    pub pending: bool,
    pub outcome: Option<Reconciliation>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T: StateValue> ChannelState<T> {
    fn from_topic_state(key: &TopicKey, state: &TopicState) -> Self {
        Self {
            value: state.displayed.as_ref().and_then(|v| decode(key, v)),
            pending: state.is_pending(),
            outcome: state.last_outcome,
            updated_at: state.updated_at,
        }
    }
}

// ── ChannelStream ───────────────────────────────────────────────────

/// `Stream` adapter over a channel's `watch::Receiver`.
pub struct ChannelStream<T: StateValue> {
    key: TopicKey,
    inner: WatchStream<TopicState>,
    _binding: Binding,
    _value: PhantomData<fn() -> T>,
}

impl<T: StateValue> Stream for ChannelStream<T> {
    type Item = ChannelState<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Every field is Unpin, so projecting through `&mut` is fine.
        let this = &mut *self;
        Pin::new(&mut this.inner)
            .poll_next(cx)
            .map(|state| state.map(|s| ChannelState::from_topic_state(&this.key, &s)))
    }
}

// ── Payload decoding ────────────────────────────────────────────────

/// Decode a payload into `T`. A JSON-encoded string (`"25"`) is retried
/// as its parsed content. Undecodable payloads read as unknown.
fn decode<T: StateValue>(key: &TopicKey, payload: &Value) -> Option<T> {
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            let retried = payload
                .as_str()
                .and_then(|text| serde_json::from_str::<T>(text).ok());
            if retried.is_none() {
                debug!(topic = %key, %payload, error = %err, "payload does not decode into channel type");
            }
            retried
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use serde_json::json;
    use vigil_api::BusMessage;

    use super::*;
    use crate::registry::TopicRegistry;
    use crate::topic::{Feature, Toggle};
    use crate::transport::{MemoryTransport, Transport};

    fn setup() -> (Arc<MemoryTransport>, TopicRegistry) {
        let transport = Arc::new(MemoryTransport::new());
        let registry =
            TopicRegistry::new(Arc::clone(&transport) as Arc<dyn Transport>, Duration::from_secs(5));
        (transport, registry)
    }

    fn channel<T: StateValue>(registry: &TopicRegistry, camera: &str, feature: Feature) -> StateChannel<T> {
        let key = TopicKey::new(camera, feature).unwrap();
        let binding = registry.bind(&key);
        StateChannel::new(key, binding)
    }

    fn push(registry: &TopicRegistry, topic: &str, payload: Value) {
        registry.apply_inbound(&BusMessage {
            topic: topic.into(),
            payload,
            retain: true,
        });
    }

    #[tokio::test]
    async fn current_value_is_none_until_first_message() {
        let (_transport, registry) = setup();
        let detect: StateChannel<Toggle> = channel(&registry, "front_door", Feature::Detect);
        assert_eq!(detect.current_value(), None);

        push(&registry, "front_door/detect/state", json!("ON"));
        assert_eq!(detect.current_value(), Some(Toggle::On));
    }

    #[tokio::test]
    async fn send_encodes_exactly_the_given_value() {
        let (transport, registry) = setup();
        let audio: StateChannel<Toggle> = channel(&registry, "yard", Feature::Audio);
        push(&registry, "yard/audio/state", json!("ON"));

        audio.send(Toggle::On).unwrap();

        assert_eq!(transport.published(), vec![("yard/audio/set".to_string(), json!("ON"))]);
        assert!(audio.is_pending());
        assert_eq!(audio.authoritative_value(), Some(Toggle::On));
    }

    #[tokio::test]
    async fn numeric_features_accept_stringified_payloads() {
        let (_transport, registry) = setup();
        let threshold: StateChannel<u32> = channel(&registry, "yard", Feature::MotionThreshold);

        push(&registry, "yard/motion_threshold/state", json!("30"));
        assert_eq!(threshold.current_value(), Some(30));

        threshold.send(25).unwrap();
        push(&registry, "yard/motion_threshold/state", json!("25"));
        assert_eq!(threshold.last_outcome(), Some(Reconciliation::Confirmed));
    }

    #[tokio::test]
    async fn garbage_payload_reads_as_unknown() {
        let (_transport, registry) = setup();
        let detect: StateChannel<Toggle> = channel(&registry, "garage", Feature::Detect);
        push(&registry, "garage/detect/state", json!({"weird": true}));
        assert_eq!(detect.current_value(), None);
    }

    #[tokio::test]
    async fn wait_for_value_resolves_on_first_message() {
        let (_transport, registry) = setup();
        let mut recordings: StateChannel<Toggle> = channel(&registry, "garage", Feature::Recordings);

        let pusher = registry.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            push(&pusher, "garage/recordings/state", json!("OFF"));
        });

        let value = tokio::time::timeout(Duration::from_secs(1), recordings.wait_for_value())
            .await
            .unwrap();
        assert_eq!(value, Some(Toggle::Off));
    }

    #[tokio::test]
    async fn changed_reports_pending_then_confirmed() {
        let (_transport, registry) = setup();
        let mut detect: StateChannel<Toggle> = channel(&registry, "front_door", Feature::Detect);
        push(&registry, "front_door/detect/state", json!("OFF"));
        detect.changed().await.unwrap();

        detect.send(Toggle::On).unwrap();
        let pending = detect.changed().await.unwrap();
        assert_eq!(pending.value, Some(Toggle::On));
        assert!(pending.pending);

        push(&registry, "front_door/detect/state", json!("ON"));
        let confirmed = detect.changed().await.unwrap();
        assert!(!confirmed.pending);
        assert_eq!(confirmed.outcome, Some(Reconciliation::Confirmed));
    }

    #[tokio::test]
    async fn stream_yields_current_then_updates_and_unbinds_on_drop() {
        let (transport, registry) = setup();
        let snapshots: StateChannel<Toggle> = channel(&registry, "yard", Feature::Snapshots);
        push(&registry, "yard/snapshots/state", json!("ON"));

        let mut stream = snapshots.into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.value, Some(Toggle::On));

        push(&registry, "yard/snapshots/state", json!("OFF"));
        let second = stream.next().await.unwrap();
        assert_eq!(second.value, Some(Toggle::Off));

        drop(stream);
        assert_eq!(registry.ref_count("yard/snapshots/state"), 0);
        assert_eq!(transport.unsubscribe_count("yard/snapshots/state"), 1);
    }
}
