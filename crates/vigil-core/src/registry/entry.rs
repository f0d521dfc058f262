// ── Per-topic registry entry ──
//
// One entry exists per state topic with at least one binder. The entry's
// map-shard lock serializes every mutation of that topic: binding,
// sending, inbound values, expiry and replay.

use std::collections::HashSet;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::reconcile::{BinderId, TopicState};
use crate::topic::Topic;

pub(crate) struct TopicEntry {
    /// Live binders. The entry is removed when this empties.
    pub(crate) binders: HashSet<BinderId>,

    /// Latest reconciled state, shared with every binder.
    pub(crate) state: watch::Sender<TopicState>,

    /// Cancels the expiry timer of the current pending command.
    pub(crate) timer: Option<CancellationToken>,

    /// Where commands for this topic are published.
    pub(crate) command_topic: Topic,

    /// Link generation the wire subscribe was sent on; `None` while it
    /// still has to be sent.
    pub(crate) wire_generation: Option<u64>,
}

impl TopicEntry {
    pub(crate) fn new(first: BinderId, command_topic: Topic, wire_generation: Option<u64>) -> Self {
        let (state, _) = watch::channel(TopicState::default());
        Self {
            binders: HashSet::from([first]),
            state,
            timer: None,
            command_topic,
            wire_generation,
        }
    }

    /// Stop the running expiry timer, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
