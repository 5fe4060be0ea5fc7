//! Call stack for subroutine-style edges.

use serde::{Deserialize, Serialize};
use story_graph::{content_hash, EdgeKind, EntityId, Event, EventKind, EventSink, GraphError};

use crate::Result;

/// One active call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Where the matching return edge leads.
    pub return_cursor: EntityId,
    /// Kind of the edge that made the call.
    pub call_type: EdgeKind,
    pub depth: usize,
    pub call_edge: EntityId,
}

/// Frames pushed by call edges and popped by return edges.
///
/// Like the graph, the stack is a registry with its own id and state hash, and every
/// push or pop is recorded so it can be rebuilt from records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStack {
    uid: EntityId,
    #[serde(default)]
    frames: Vec<StackFrame>,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStack {
    pub fn new() -> Self {
        Self::with_uid(EntityId::new())
    }

    pub fn with_uid(uid: EntityId) -> Self {
        Self {
            uid,
            frames: Vec::new(),
        }
    }

    pub fn uid(&self) -> EntityId {
        self.uid
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The innermost active call.
    pub fn peek(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn push(
        &mut self,
        return_cursor: EntityId,
        call_type: EdgeKind,
        call_edge: EntityId,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let frame = StackFrame {
            return_cursor,
            call_type,
            depth: self.frames.len(),
            call_edge,
        };
        sink.record(Event::push(self.uid, serde_json::to_value(&frame)?));
        tracing::debug!(depth = frame.depth, return_to = %return_cursor, "call frame pushed");
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self, sink: &mut dyn EventSink) -> Result<Option<StackFrame>> {
        let Some(frame) = self.frames.pop() else {
            return Ok(None);
        };
        sink.record(Event::pop(self.uid, serde_json::to_value(&frame)?));
        tracing::debug!(depth = frame.depth, "call frame popped");
        Ok(Some(frame))
    }

    pub fn state_hash(&self) -> Result<String> {
        Ok(content_hash(&self.frames)?)
    }

    /// Apply a recorded push or pop.
    pub fn apply_event(&mut self, event: &Event) -> Result<()> {
        let malformed = |reason: &str| GraphError::MalformedEvent {
            target: event.target,
            reason: reason.to_string(),
        };
        if event.target != self.uid {
            return Err(malformed("event targets another stack").into());
        }
        match event.kind {
            EventKind::Push => {
                let value = event.new.clone().ok_or_else(|| malformed("push without frame"))?;
                self.frames.push(serde_json::from_value(value)?);
            }
            EventKind::Pop => {
                let value = event.old.clone().ok_or_else(|| malformed("pop without frame"))?;
                let expected: StackFrame = serde_json::from_value(value)?;
                match self.frames.pop() {
                    Some(frame) if frame == expected => {}
                    _ => return Err(malformed("popped frame does not match").into()),
                }
            }
            _ => return Err(malformed("not a stack event").into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_graph::Watcher;

    #[test]
    fn test_push_pop_records_events() {
        let mut stack = CallStack::new();
        let mut watcher = Watcher::new();
        let home = EntityId::new();
        let edge = EntityId::new();

        stack.push(home, EdgeKind::Choice, edge, &mut watcher).unwrap();
        assert_eq!(stack.peek().map(|f| f.return_cursor), Some(home));
        let frame = stack.pop(&mut watcher).unwrap().unwrap();
        assert_eq!(frame.call_edge, edge);
        assert!(stack.pop(&mut watcher).unwrap().is_none());

        let kinds: Vec<_> = watcher.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Push, EventKind::Pop]);
    }

    #[test]
    fn test_replay_and_rollback() {
        let mut stack = CallStack::new();
        let mut replica = CallStack::with_uid(stack.uid());
        let mut watcher = Watcher::new();
        stack.push(EntityId::new(), EdgeKind::Choice, EntityId::new(), &mut watcher).unwrap();
        stack.push(EntityId::new(), EdgeKind::Continue, EntityId::new(), &mut watcher).unwrap();
        stack.pop(&mut watcher).unwrap();

        for event in watcher.events() {
            replica.apply_event(event).unwrap();
        }
        assert_eq!(replica.state_hash().unwrap(), stack.state_hash().unwrap());

        for event in watcher.rollback_events() {
            replica.apply_event(&event).unwrap();
        }
        assert!(replica.is_empty());
    }

    #[test]
    fn test_rejects_foreign_events() {
        let mut stack = CallStack::new();
        let event = Event::push(EntityId::new(), serde_json::json!({}));
        assert!(stack.apply_event(&event).is_err());
    }
}
