//! Entity definitions - the root of everything stored in a story graph.

mod criteria;
mod kind;

pub use criteria::*;
pub use kind::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Unique identifier for every entity in a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new random entity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an entity ID from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a nil/empty entity ID (useful for defaults).
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity, label, tags and free-form attributes shared by every item.
///
/// Equality and hashing are by identity only; two entities with the same label are
/// still different entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub label: Option<String>,
    /// Runtime kind, resolved against a [`KindTable`] during dispatch.
    pub kind: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Insertion order within the owning graph. Assigned by the graph.
    #[serde(default)]
    pub seq: u64,
}

impl Entity {
    /// Create a new entity of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            label: None,
            kind: kind.into(),
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Label if present, otherwise the id as a string.
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.to_string())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
