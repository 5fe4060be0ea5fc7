//! The static kind table - explicit single inheritance between entity kinds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{GraphError, GraphResult};

pub const KIND_ENTITY: &str = "entity";
pub const KIND_NODE: &str = "node";
pub const KIND_EDGE: &str = "edge";
pub const KIND_SUBGRAPH: &str = "subgraph";
pub const KIND_TOKEN: &str = "token";

/// Parent links between kinds, used to rank handlers by specialization.
///
/// Each kind has at most one parent. `entity` is the root; `node`, `edge` and
/// `subgraph` are built in. Hosts register their content kinds (`scene`, `block`,
/// `actor`...) under one of those.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindTable {
    parents: BTreeMap<String, Option<String>>,
}

impl Default for KindTable {
    fn default() -> Self {
        let mut parents = BTreeMap::new();
        parents.insert(KIND_ENTITY.to_string(), None);
        parents.insert(KIND_NODE.to_string(), Some(KIND_ENTITY.to_string()));
        parents.insert(KIND_EDGE.to_string(), Some(KIND_ENTITY.to_string()));
        parents.insert(KIND_SUBGRAPH.to_string(), Some(KIND_NODE.to_string()));
        parents.insert(KIND_TOKEN.to_string(), Some(KIND_NODE.to_string()));
        Self { parents }
    }
}

impl KindTable {
    /// Create a table holding the built-in kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind under an existing parent.
    pub fn register(&mut self, kind: impl Into<String>, parent: &str) -> GraphResult<()> {
        let kind = kind.into();
        if !self.parents.contains_key(parent) {
            return Err(GraphError::UnknownKind(parent.to_string()));
        }
        if self.parents.contains_key(&kind) {
            return Err(GraphError::DuplicateKind(kind));
        }
        self.parents.insert(kind, Some(parent.to_string()));
        Ok(())
    }

    /// Builder form of [`KindTable::register`].
    pub fn with_kind(mut self, kind: impl Into<String>, parent: &str) -> GraphResult<Self> {
        self.register(kind, parent)?;
        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.parents.contains_key(kind)
    }

    pub fn parent(&self, kind: &str) -> Option<&str> {
        self.parents.get(kind).and_then(|p| p.as_deref())
    }

    /// Number of links between a kind and the root. `entity` has depth 0.
    pub fn depth(&self, kind: &str) -> Option<u32> {
        let mut depth = 0;
        let mut current = self.parents.get(kind)?;
        while let Some(parent) = current {
            depth += 1;
            current = self.parents.get(parent.as_str())?;
        }
        Some(depth)
    }

    /// Distance from `kind` up to `ancestor`, if `ancestor` is `kind` or one of its
    /// ancestors. Unknown kinds only match themselves.
    pub fn distance(&self, kind: &str, ancestor: &str) -> Option<u32> {
        if kind == ancestor {
            return Some(0);
        }
        let mut distance = 0;
        let mut current = kind;
        while let Some(parent) = self.parent(current) {
            distance += 1;
            if parent == ancestor {
                return Some(distance);
            }
            current = parent;
        }
        None
    }

    pub fn is_a(&self, kind: &str, ancestor: &str) -> bool {
        self.distance(kind, ancestor).is_some()
    }
}
