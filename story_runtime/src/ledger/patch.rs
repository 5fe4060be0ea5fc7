//! Batches of events bound to the registry state they were recorded against.

use serde::{Deserialize, Serialize};
use story_graph::{EntityId, Event, Graph};

use crate::frame::CallStack;
use crate::{Error, Result};

/// Events plus the id and pre-batch hash of the registry they apply to.
///
/// Applying to anything else fails; a patch is never silently corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub registry_id: EntityId,
    pub state_hash: String,
    pub events: Vec<Event>,
}

impl Patch {
    pub fn new(registry_id: EntityId, state_hash: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            registry_id,
            state_hash: state_hash.into(),
            events,
        }
    }

    fn check(&self, registry_id: EntityId, state_hash: String) -> Result<()> {
        if self.registry_id != registry_id {
            return Err(Error::RegistryMismatch {
                patch: self.registry_id,
                target: registry_id,
            });
        }
        if self.state_hash != state_hash {
            return Err(Error::StateHashMismatch {
                expected: self.state_hash.clone(),
                actual: state_hash,
            });
        }
        Ok(())
    }

    /// Apply to a graph. On any failure the graph is left as it was.
    pub fn apply(&self, graph: &mut Graph) -> Result<()> {
        self.check(graph.uid(), graph.state_hash()?)?;
        let mut next = graph.clone();
        for event in &self.events {
            next.apply_event(event)?;
        }
        *graph = next;
        Ok(())
    }

    /// Apply to a call stack. On any failure the stack is left as it was.
    pub fn apply_to_stack(&self, stack: &mut CallStack) -> Result<()> {
        self.check(stack.uid(), stack.state_hash()?)?;
        let mut next = stack.clone();
        for event in &self.events {
            next.apply_event(event)?;
        }
        *stack = next;
        Ok(())
    }
}
