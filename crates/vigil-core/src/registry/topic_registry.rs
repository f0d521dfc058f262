// ── Reference-counted topic registry ──
//
// Maps each state topic to its binders and reconciled state. The first
// binder of a topic issues the wire subscribe, the last one to leave
// issues the unsubscribe, so N consumers of a topic cost one wire
// subscription. Inbound values, command sends, expiry timers and
// reconnect replay all mutate a topic under its `DashMap` entry lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vigil_api::BusMessage;

use super::entry::TopicEntry;
use crate::error::CoreError;
use crate::reconcile::{BinderId, CommandId, PendingCommand, Reconciliation, TopicState};
use crate::topic::{Topic, TopicKey};
use crate::transport::Transport;

/// Shared registry of bound topics.
///
/// Cheaply cloneable via `Arc<RegistryInner>`.
#[derive(Clone)]
pub struct TopicRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    entries: DashMap<Topic, TopicEntry>,
    confirm_timeout: Duration,
    next_binder: AtomicU64,
    next_command: AtomicU64,
}

impl TopicRegistry {
    pub fn new(transport: Arc<dyn Transport>, confirm_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                entries: DashMap::new(),
                confirm_timeout,
                next_binder: AtomicU64::new(0),
                next_command: AtomicU64::new(0),
            }),
        }
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.inner.confirm_timeout
    }

    // ── Binding ──────────────────────────────────────────────────────

    /// Register interest in `key`'s state topic.
    ///
    /// The first binder sends the wire subscribe. The returned guard
    /// carries the cached state (unknown until the first inbound value)
    /// and unbinds when dropped.
    pub fn bind(&self, key: &TopicKey) -> Binding {
        let topic = key.state_topic();
        let binder = BinderId(self.inner.next_binder.fetch_add(1, Ordering::Relaxed) + 1);

        let receiver = match self.inner.entries.entry(topic.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.binders.insert(binder);
                trace!(topic = %topic, %binder, binders = entry.binders.len(), "joined existing subscription");
                entry.state.subscribe()
            }
            Entry::Vacant(vacant) => {
                let wire_generation = self.inner.transport.subscribe(&topic);
                debug!(
                    topic = %topic,
                    %binder,
                    online = wire_generation.is_some(),
                    "first binder, subscribing"
                );
                let entry = TopicEntry::new(binder, key.command_topic(), wire_generation);
                let receiver = entry.state.subscribe();
                vacant.insert(entry);
                receiver
            }
        };

        Binding {
            registry: self.clone(),
            topic,
            binder,
            receiver,
        }
    }

    /// Remove `binder` from `topic`. The last binder out sends the wire
    /// unsubscribe and drops the cached state. Unknown topics or binders
    /// are a no-op; returns whether anything was removed.
    pub fn unbind(&self, topic: &Topic, binder: BinderId) -> bool {
        self.inner.unbind(topic, binder)
    }

    // ── Commands and inbound values ──────────────────────────────────

    /// Publish `value` to the topic's command topic and display it
    /// optimistically until the backend confirms, overrides, or the
    /// confirmation window runs out.
    ///
    /// Fails without touching the cached state if the link is down.
    pub fn send(&self, topic: &Topic, binder: BinderId, value: Value) -> Result<CommandId, CoreError> {
        let mut entry = self
            .inner
            .entries
            .get_mut(topic)
            .filter(|entry| entry.binders.contains(&binder))
            .ok_or_else(|| CoreError::NotBound {
                topic: topic.to_string(),
            })?;

        // Published under the entry lock, so the echo cannot be applied
        // before the pending record exists.
        self.inner.transport.publish(&entry.command_topic, &value)?;

        let id = CommandId(self.inner.next_command.fetch_add(1, Ordering::Relaxed) + 1);
        let command = PendingCommand {
            id,
            value,
            issued_at: Instant::now(),
            binder,
        };

        let mut superseded = None;
        entry
            .state
            .send_modify(|state| superseded = state.begin_command(command));
        if let Some(old) = superseded {
            debug!(topic = %topic, superseded = %old.id, command = %id, "pending command superseded");
        }

        entry.cancel_timer();
        entry.timer = self.spawn_expiry(topic.clone(), id);

        debug!(topic = %topic, command = %id, %binder, "command published, awaiting confirmation");
        Ok(id)
    }

    /// Apply an inbound bus value. Returns `None` if nobody is bound to
    /// the topic.
    pub fn apply_inbound(&self, message: &BusMessage) -> Option<Reconciliation> {
        let Some(mut entry) = self.inner.entries.get_mut(message.topic.as_str()) else {
            trace!(topic = %message.topic, "no binders for inbound topic");
            return None;
        };

        let mut outcome = Reconciliation::External;
        entry
            .state
            .send_modify(|state| outcome = state.apply_inbound(message.payload.clone()));

        match outcome {
            Reconciliation::Overridden => {
                entry.cancel_timer();
                info!(topic = %message.topic, payload = %message.payload, "pending command overridden by backend");
            }
            Reconciliation::Confirmed => {
                entry.cancel_timer();
                debug!(topic = %message.topic, "command confirmed");
            }
            _ => trace!(topic = %message.topic, payload = %message.payload, "value updated"),
        }

        Some(outcome)
    }

    // ── Link lifecycle ───────────────────────────────────────────────

    /// Send one wire subscribe for every bound topic not yet subscribed
    /// on link `generation`. Returns how many were sent.
    pub fn resubscribe(&self, generation: u64) -> usize {
        let mut replayed = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry.wire_generation == Some(generation) {
                continue;
            }
            let topic = entry.key().clone();
            entry.wire_generation = self.inner.transport.subscribe(&topic);
            if entry.wire_generation.is_some() {
                replayed += 1;
            }
        }
        replayed
    }

    /// Re-issue the wire subscribe for every bound topic, even those
    /// already subscribed on the current link, so the bus replays retained
    /// values. Used after inbound messages were lost. Returns how many
    /// were sent.
    pub fn resync(&self) -> usize {
        let mut replayed = 0;
        for mut entry in self.inner.entries.iter_mut() {
            let topic = entry.key().clone();
            if let Some(generation) = self.inner.transport.subscribe(&topic) {
                entry.wire_generation = Some(generation);
                replayed += 1;
            }
        }
        replayed
    }

    /// Revert every pending command. Called when the link drops, since
    /// a confirmation can no longer arrive for them.
    pub fn invalidate_all_pending(&self) -> usize {
        let mut dropped = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry
                .state
                .send_if_modified(|state| state.invalidate_pending().is_some())
            {
                entry.cancel_timer();
                debug!(topic = %entry.key(), "pending command discarded on link loss");
                dropped += 1;
            }
        }
        dropped
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Number of live binders on `topic`.
    pub fn ref_count(&self, topic: &str) -> usize {
        self.inner
            .entries
            .get(topic)
            .map_or(0, |entry| entry.binders.len())
    }

    /// Bound state topics, sorted.
    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Current reconciled state of `topic`, if bound.
    pub fn snapshot(&self, topic: &str) -> Option<TopicState> {
        self.inner
            .entries
            .get(topic)
            .map(|entry| entry.state.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Start the confirmation timer for command `id`.
    ///
    /// The task holds only a weak reference so a dropped registry does
    /// not linger until the timer fires.
    fn spawn_expiry(&self, topic: Topic, id: CommandId) -> Option<CancellationToken> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %topic, command = %id, "no runtime for confirmation timer, command stays pending");
            return None;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let registry = Arc::downgrade(&self.inner);
        let timeout = self.inner.confirm_timeout;

        handle.spawn(async move {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(inner) = registry.upgrade() {
                        inner.expire(&topic, id, timeout);
                    }
                }
            }
        });

        Some(token)
    }
}

impl RegistryInner {
    fn unbind(&self, topic: &Topic, binder: BinderId) -> bool {
        let Entry::Occupied(mut occupied) = self.entries.entry(topic.clone()) else {
            return false;
        };

        let entry = occupied.get_mut();
        if !entry.binders.remove(&binder) {
            return false;
        }

        if entry
            .state
            .send_if_modified(|state| state.discard_pending_from(binder).is_some())
        {
            entry.cancel_timer();
            debug!(topic = %topic, %binder, "discarded pending command of departing binder");
        }

        if entry.binders.is_empty() {
            entry.cancel_timer();
            // Still under the entry lock: a concurrent rebind's subscribe
            // is queued after this unsubscribe.
            self.transport.unsubscribe(topic);
            occupied.remove();
            debug!(topic = %topic, "last binder left, unsubscribed");
        }

        true
    }

    fn expire(&self, topic: &Topic, id: CommandId, timeout: Duration) {
        let Some(mut entry) = self.entries.get_mut(topic) else {
            return;
        };

        if entry.state.send_if_modified(|state| state.expire(id)) {
            entry.timer = None;
            warn!(
                topic = %topic,
                command = %id,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "command not confirmed in time, reverted to last known value"
            );
        }
    }
}

// ── Binding ─────────────────────────────────────────────────────────

/// RAII guard for one binder's interest in a topic.
///
/// Dropping it unbinds, discarding any command this binder still has
/// pending.
pub struct Binding {
    registry: TopicRegistry,
    topic: Topic,
    binder: BinderId,
    receiver: watch::Receiver<TopicState>,
}

impl Binding {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn binder(&self) -> BinderId {
        self.binder
    }

    /// Cached reconciled state.
    pub fn state(&self) -> TopicState {
        self.receiver.borrow().clone()
    }

    /// Displayed value, or `None` while unknown.
    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().displayed.clone()
    }

    /// A fresh receiver of state changes for this topic.
    pub fn receiver(&self) -> watch::Receiver<TopicState> {
        self.receiver.clone()
    }

    /// Inspect the cached state without cloning it.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&TopicState) -> R) -> R {
        f(&self.receiver.borrow())
    }

    pub(crate) fn receiver_mut(&mut self) -> &mut watch::Receiver<TopicState> {
        &mut self.receiver
    }

    pub fn send(&self, value: Value) -> Result<CommandId, CoreError> {
        self.registry.send(&self.topic, self.binder, value)
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.registry.inner.unbind(&self.topic, self.binder);
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("topic", &self.topic)
            .field("binder", &self.binder)
            .finish_non_exhaustive()
    }
}
