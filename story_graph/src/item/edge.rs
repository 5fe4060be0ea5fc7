//! Edge definitions.

use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId, Requirement, KIND_EDGE};

/// What an edge means to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Offered to the player in the choice menu.
    Choice,
    /// Something the source node needs; journaled as an attached concept.
    Dependency,
    /// Something the environment offers the source node unprompted.
    Affordance,
    /// Followed automatically on entry, before the node is processed.
    Redirect,
    /// Followed automatically on exit, after the node is processed.
    Continue,
    /// Synthesized to leave a called subroutine.
    Return,
    /// Plain structural link.
    Structural,
}

/// A link from one item to another.
///
/// Edges with a [`Requirement`] are "dynamic": their destination stays unbound until
/// provisioning finds a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub entity: Entity,
    pub source: EntityId,
    pub destination: Option<EntityId>,
    pub edge_kind: EdgeKind,
    pub requirement: Option<Requirement>,
    /// Following this edge pushes a call frame.
    #[serde(default)]
    pub is_call: bool,
    /// Where a call returns to. Defaults to the source.
    pub return_to: Option<EntityId>,
}

impl Edge {
    /// Create a resolved edge.
    pub fn new(source: EntityId, destination: EntityId, edge_kind: EdgeKind) -> Self {
        Self {
            entity: Entity::new(KIND_EDGE),
            source,
            destination: Some(destination),
            edge_kind,
            requirement: None,
            is_call: false,
            return_to: None,
        }
    }

    pub fn choice(source: EntityId, destination: EntityId) -> Self {
        Self::new(source, destination, EdgeKind::Choice)
    }

    /// Create a dynamic edge whose destination is provisioned.
    pub fn dynamic(source: EntityId, edge_kind: EdgeKind, requirement: Requirement) -> Self {
        Self {
            entity: Entity::new(KIND_EDGE),
            source,
            destination: None,
            edge_kind,
            requirement: Some(requirement),
            is_call: false,
            return_to: None,
        }
    }

    pub fn dependency(source: EntityId, requirement: Requirement) -> Self {
        Self::dynamic(source, EdgeKind::Dependency, requirement)
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity.label = Some(label.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.entity.kind = kind.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.entity.tags.insert(tag.into());
        self
    }

    /// Mark this edge as a call returning to `return_to` (or its source).
    pub fn as_call(mut self, return_to: Option<EntityId>) -> Self {
        self.is_call = true;
        self.return_to = return_to;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.requirement.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.destination.is_some()
    }

    /// Dynamic edge still waiting for a provider.
    pub fn is_open(&self) -> bool {
        self.destination.is_none()
            && self
                .requirement
                .as_ref()
                .map(|req| req.provider.is_none())
                .unwrap_or(false)
    }
}
