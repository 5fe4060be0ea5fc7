//! Mutation events and the sinks that capture them.
//!
//! Every mutating graph operation takes a `&mut dyn EventSink`. Pass a [`Watcher`] to
//! record, or [`Discard`] when nothing needs to be replayed.

use serde::{Deserialize, Serialize};

use crate::EntityId;

/// What happened to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An item was added; `new` holds the whole item.
    Create,
    /// A field changed; `field` is a JSON pointer into the item.
    Update,
    /// An item was removed; `old` holds the whole item.
    Delete,
    /// A call frame was pushed; `new` holds the frame.
    Push,
    /// A call frame was popped; `old` holds the frame.
    Pop,
}

/// A single reversible mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub target: EntityId,
    pub field: Option<String>,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

impl Event {
    pub fn create(target: EntityId, value: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Create,
            target,
            field: None,
            old: None,
            new: Some(value),
        }
    }

    /// A field change. `None` on either side means the field was absent.
    pub fn update(
        target: EntityId,
        field: impl Into<String>,
        old: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: EventKind::Update,
            target,
            field: Some(field.into()),
            old,
            new,
        }
    }

    pub fn delete(target: EntityId, value: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Delete,
            target,
            field: None,
            old: Some(value),
            new: None,
        }
    }

    pub fn push(target: EntityId, frame: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Push,
            target,
            field: None,
            old: None,
            new: Some(frame),
        }
    }

    pub fn pop(target: EntityId, frame: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Pop,
            target,
            field: None,
            old: Some(frame),
            new: None,
        }
    }

    /// The event that undoes this one.
    pub fn inverse(&self) -> Self {
        let kind = match self.kind {
            EventKind::Create => EventKind::Delete,
            EventKind::Delete => EventKind::Create,
            EventKind::Update => EventKind::Update,
            EventKind::Push => EventKind::Pop,
            EventKind::Pop => EventKind::Push,
        };
        Self {
            kind,
            target: self.target,
            field: self.field.clone(),
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }

    /// Call-stack events; everything else targets the graph.
    pub fn is_stack_event(&self) -> bool {
        matches!(self.kind, EventKind::Push | EventKind::Pop)
    }
}

/// Receives events in the order the mutations happen.
pub trait EventSink {
    fn record(&mut self, event: Event);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl EventSink for Discard {
    fn record(&mut self, _event: Event) {}
}

impl EventSink for Vec<Event> {
    fn record(&mut self, event: Event) {
        self.push(event);
    }
}

/// Buffers events and tracks a checkpoint between batches.
///
/// Everything recorded stays in the buffer until [`Watcher::clear`], so a failed
/// step can be rolled back even after some batches were packaged.
#[derive(Debug, Clone, Default)]
pub struct Watcher {
    events: Vec<Event>,
    checkpoint: usize,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events recorded since the last checkpoint.
    pub fn pending(&self) -> &[Event] {
        &self.events[self.checkpoint..]
    }

    pub fn has_pending(&self) -> bool {
        self.checkpoint < self.events.len()
    }

    /// Return the pending batch and move the checkpoint past it.
    pub fn take_batch(&mut self) -> Vec<Event> {
        let batch = self.events[self.checkpoint..].to_vec();
        self.checkpoint = self.events.len();
        batch
    }

    /// Inverse events for everything recorded, newest first.
    pub fn rollback_events(&self) -> Vec<Event> {
        self.events.iter().rev().map(Event::inverse).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.checkpoint = 0;
    }
}

impl EventSink for Watcher {
    fn record(&mut self, event: Event) {
        tracing::trace!(kind = ?event.kind, target = %event.target, field = ?event.field, "event recorded");
        self.events.push(event);
    }
}
