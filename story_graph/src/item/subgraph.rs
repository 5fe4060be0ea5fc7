//! Subgraph definitions - containers such as scenes and chapters.

use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId};

/// An ordered container of other items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub entity: Entity,
    pub parent: Option<EntityId>,
    #[serde(default)]
    pub members: Vec<EntityId>,
}

impl Subgraph {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            entity: Entity::new(kind),
            parent: None,
            members: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity.label = Some(label.into());
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains(&id)
    }
}
