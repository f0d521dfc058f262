// ── Topic registry ──
//
// Reference-counted topic subscriptions with a cached, reconciled value
// per topic.

mod entry;
mod topic_registry;

pub use topic_registry::{Binding, TopicRegistry};
