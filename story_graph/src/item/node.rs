//! Node definitions.

use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId};

/// A story node: a place the cursor can stand on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub entity: Entity,
    /// Owning container, at most one.
    pub parent: Option<EntityId>,
    /// The node's own prose, journaled before anything else.
    pub content: Option<String>,
}

impl Node {
    /// Create a new node of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            entity: Entity::new(kind),
            parent: None,
            content: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity.label = Some(label.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.entity.tags.insert(tag.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.entity.attributes.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}
