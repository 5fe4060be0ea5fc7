//! Structural errors raised by the graph registry.

use thiserror::Error;

use crate::EntityId;

/// Invalid mutations of the graph. These are never recovered locally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("item {0} already exists in the graph")]
    DuplicateId(EntityId),

    #[error("item {from} links to {to}, which is not in the graph")]
    DanglingLink { from: EntityId, to: EntityId },

    #[error("item {0} not found")]
    NotFound(EntityId),

    #[error("item {id} is still referenced by {by}")]
    StillReferenced { id: EntityId, by: EntityId },

    #[error("item {id} is not a {expected}")]
    WrongItemType { id: EntityId, expected: &'static str },

    #[error("edge {0} carries no requirement")]
    NoRequirement(EntityId),

    #[error("field {field} on item {id} could not be written: {reason}")]
    InvalidField {
        id: EntityId,
        field: String,
        reason: String,
    },

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("kind {0} is already registered")]
    DuplicateKind(String),

    #[error("malformed event for {target}: {reason}")]
    MalformedEvent { target: EntityId, reason: String },

    #[error("state could not be encoded for hashing: {0}")]
    Unhashable(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
