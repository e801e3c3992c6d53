//! Event system: typed events, per-bot priority queues and condition predicates

pub mod condition;
pub mod hub;
pub mod kind;
pub mod queue;

pub use condition::{Condition, ConditionContext, ConditionSpec, FnCondition};
pub use hub::EventHub;
pub use kind::{priority_of, EventKind, GameEvent, RecipientContext};
pub use queue::{EventHandler, EventQueue, QueueError};
