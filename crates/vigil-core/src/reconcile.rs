// ── Command reconciliation ──
//
// Per-topic state machine that merges an operator's optimistic command
// with the authoritative value the backend later reports:
//
//   send(v)        → displayed = v, pending = v
//   inbound w      → displayed = authoritative = w, pending cleared
//                    (Confirmed if w == v, Overridden otherwise,
//                     External if nothing was pending)
//   timeout        → displayed = authoritative, pending cleared (TimedOut)
//   link loss /    → displayed = authoritative, pending cleared (Discarded)
//   unbind
//
// Pure data: the registry owns locking, timers and notification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

// ── Identifiers ─────────────────────────────────────────────────────

/// Identity of one bound consumer within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BinderId(pub(crate) u64);

impl fmt::Display for BinderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binder-{}", self.0)
    }
}

/// Identity of one sent command. Expiry timers carry it so a timer that
/// belongs to a superseded command does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CommandId(pub(crate) u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

// ── PendingCommand ──────────────────────────────────────────────────

/// A sent value awaiting the backend's echo.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub id: CommandId,
    pub value: Value,
    pub issued_at: Instant,
    pub binder: BinderId,
}

// ── Reconciliation ──────────────────────────────────────────────────

/// How the most recent pending command (or inbound value) was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reconciliation {
    /// Inbound value with nothing pending.
    External,
    /// Inbound value matched the pending command.
    Confirmed,
    /// Inbound value differed from the pending command and won.
    Overridden,
    /// No inbound value within the confirmation window.
    TimedOut,
    /// Pending command dropped by link loss or by its binder unbinding.
    Discarded,
}

// ── TopicState ──────────────────────────────────────────────────────

/// Everything the registry knows about one topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicState {
    /// What consumers should show: the pending value if any, otherwise
    /// the last authoritative value.
    pub displayed: Option<Value>,
    /// Last value received from the bus.
    pub authoritative: Option<Value>,
    #[serde(skip)]
    pub pending: Option<PendingCommand>,
    pub last_outcome: Option<Reconciliation>,
    /// Wall-clock time of the last inbound value.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TopicState {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Install `command` as the pending command and display its value.
    /// Returns the command it superseded, if any. The authoritative value
    /// is left untouched so a timeout still reverts to the last inbound.
    pub fn begin_command(&mut self, command: PendingCommand) -> Option<PendingCommand> {
        self.displayed = Some(command.value.clone());
        self.pending.replace(command)
    }

    /// Adopt an inbound value. Always clears any pending command.
    pub fn apply_inbound(&mut self, value: Value) -> Reconciliation {
        let outcome = match self.pending.take() {
            None => Reconciliation::External,
            Some(pending) if payload_matches(&pending.value, &value) => Reconciliation::Confirmed,
            Some(_) => Reconciliation::Overridden,
        };

        self.displayed = Some(value.clone());
        self.authoritative = Some(value);
        self.last_outcome = Some(outcome);
        self.updated_at = Some(Utc::now());
        outcome
    }

    /// Revert the command `id` if it is still pending.
    pub fn expire(&mut self, id: CommandId) -> bool {
        if self.pending.as_ref().is_none_or(|p| p.id != id) {
            return false;
        }
        self.revert(Reconciliation::TimedOut);
        true
    }

    /// Drop the pending command if `binder` issued it.
    pub fn discard_pending_from(&mut self, binder: BinderId) -> Option<CommandId> {
        if self.pending.as_ref().is_none_or(|p| p.binder != binder) {
            return None;
        }
        self.revert(Reconciliation::Discarded)
    }

    /// Drop whatever command is pending.
    pub fn invalidate_pending(&mut self) -> Option<CommandId> {
        if self.pending.is_none() {
            return None;
        }
        self.revert(Reconciliation::Discarded)
    }

    fn revert(&mut self, outcome: Reconciliation) -> Option<CommandId> {
        let pending = self.pending.take()?;
        self.displayed.clone_from(&self.authoritative);
        self.last_outcome = Some(outcome);
        Some(pending.id)
    }
}

/// Whether an observed payload confirms a sent one.
///
/// Some bridges echo numbers as strings (`25` comes back as `"25"`), so a
/// string is also compared by its JSON parse against a non-string.
pub fn payload_matches(sent: &Value, observed: &Value) -> bool {
    if sent == observed {
        return true;
    }
    match (sent, observed) {
        (Value::String(s), other) | (other, Value::String(s)) if !other.is_string() => {
            serde_json::from_str::<Value>(s).is_ok_and(|parsed| &parsed == other)
        }
        _ => false,
    }
}
