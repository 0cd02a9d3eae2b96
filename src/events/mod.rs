//! Event & Metrics Bus (C8): non-blocking fan-out of lifecycle events to
//! subscribers, grounded on the teacher's `CallbackRegistry` (priority list
//! dispatch, `TypeId`-style keying) but keyed on [`EventKind`] instead of
//! step type, per spec §4.8.

pub mod metrics;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub use metrics::{MetricsSink, MetricsSnapshot};

/// Which lifecycle moment an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `Agent::run` was invoked and the state/lock was acquired.
    RunStarted,
    /// The run reached a terminal state (success or error).
    RunCompleted,
    /// A new turn began.
    StepStarted,
    /// A turn finished (committed to state).
    StepCompleted,
    /// A model call was dispatched.
    LlmCallStarted,
    /// A model call returned (success or error).
    LlmCallCompleted,
    /// A filtered, visible streaming chunk arrived.
    LlmChunkReceived,
    /// A tool invocation was dispatched.
    ToolCallStarted,
    /// A tool invocation completed (any outcome).
    ToolCallCompleted,
    /// A host-visible status update (only emitted when `emit_public_status`).
    StatusUpdate,
    /// The loop detector tripped.
    LoopDetected,
    /// A Chain-of-Thought / Tree-of-Thoughts reasoning step was produced.
    ReasoningStep,
}

/// One emitted lifecycle event. `turn_index` is `None` for events not scoped
/// to a particular turn (`RunStarted`, `RunCompleted`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Which kind of event this is.
    pub kind: EventKind,
    /// The agent this event concerns.
    pub agent_id: String,
    /// The turn this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<usize>,
    /// When this event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload, left as free-form JSON so new kinds don't force
    /// a breaking change to this struct.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Construct an event with the current time and given payload.
    #[must_use]
    pub fn new(kind: EventKind, agent_id: impl Into<String>, turn_index: Option<usize>, payload: Value) -> Self {
        Self {
            kind,
            agent_id: agent_id.into(),
            turn_index,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// An event subscriber. Implementors must be cheap and non-blocking; slow
/// work should be offloaded (e.g. to a channel) rather than done inline,
/// since dispatch happens on the turn loop's own task.
pub trait EventHandler: Send + Sync {
    /// Handle one event. Must not panic — the bus catches unwinds from
    /// `call` via `catch_unwind` but a handler that panics routinely will
    /// still lose events if the bus itself is dropped mid-unwind.
    fn handle(&self, event: &Event);
}

impl<F: Fn(&Event) + Send + Sync> EventHandler for F {
    fn handle(&self, event: &Event) {
        self(event);
    }
}

/// A handle returned by [`EventBus::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Subscriber {
    id: u64,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
}

/// Process-scoped, shared event bus. Subscriber list is copy-on-write: each
/// dispatch clones the `Arc<Vec<_>>` snapshot once and iterates it, so a
/// concurrent `subscribe`/`unsubscribe` never blocks or races a dispatch in
/// flight (spec §5 "subscriber list is copy-on-write").
pub struct EventBus {
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
    next_id: AtomicU64,
    metrics: MetricsSink,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// An empty bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
            metrics: MetricsSink::new(),
        }
    }

    /// The metrics sink this bus feeds; share this with [`crate::agent::Agent::metrics`].
    #[must_use]
    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// Register a handler for one event kind.
    pub fn subscribe(&self, kind: EventKind, handler: impl EventHandler + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.subscribers.write();
        let mut next = (**guard).clone();
        next.push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        *guard = Arc::new(next);
        Subscription(id)
    }

    /// Remove a previously registered subscriber. No-op if already removed.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut guard = self.subscribers.write();
        let next: Vec<Subscriber> = (**guard)
            .iter()
            .filter(|s| s.id != subscription.0)
            .map(|s| Subscriber {
                id: s.id,
                kind: s.kind,
                handler: Arc::clone(&s.handler),
            })
            .collect();
        *guard = Arc::new(next);
    }

    /// Emit an event: record it in metrics, then fan out to every matching
    /// subscriber in registration order. A subscriber that panics is caught
    /// and logged; it never affects the run or other subscribers.
    pub fn emit(&self, event: Event) {
        self.metrics.record_event(&event);
        let snapshot = Arc::clone(&self.subscribers.read());
        for subscriber in snapshot.iter().filter(|s| s.kind == event.kind) {
            let handler = Arc::clone(&subscriber.handler);
            let event_ref = &event;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.handle(event_ref);
            }));
            if outcome.is_err() {
                warn!(
                    agent_id = %event.agent_id,
                    kind = ?event.kind,
                    "event subscriber panicked; isolating and continuing"
                );
            }
        }
    }
}

/// A shared, cloneable handle to the process-scoped event bus.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_only_to_matching_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(EventKind::RunStarted, move |_: &Event| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new(EventKind::RunStarted, "a", None, Value::Null));
        bus.emit(Event::new(EventKind::RunCompleted, "a", None, Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let sub = bus.subscribe(EventKind::StepStarted, move |_: &Event| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new(EventKind::StepStarted, "a", Some(0), Value::Null));
        bus.unsubscribe(sub);
        bus.emit(Event::new(EventKind::StepStarted, "a", Some(1), Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_break_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::StatusUpdate, |_: &Event| panic!("boom"));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(EventKind::StatusUpdate, move |_: &Event| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new(EventKind::StatusUpdate, "a", None, Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
