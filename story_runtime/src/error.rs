use story_graph::{EntityId, GraphError};
use thiserror::Error;

/// Errors raised by the runtime.
///
/// Ordinary "nothing could be provisioned" outcomes are not errors; they are reported
/// in the [`PlanningReceipt`](crate::PlanningReceipt).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node {0} is not available")]
    Unavailable(EntityId),

    #[error("Edge {0} has no destination")]
    UnresolvedEdge(EntityId),

    #[error("Edge {edge} is not a choice leaving {cursor}")]
    NotAChoice { edge: EntityId, cursor: EntityId },

    #[error("No handler produced a result for task {0:?}")]
    NoHandler(String),

    #[error("Handler for task {task:?} failed: {message}")]
    Handler { task: String, message: String },

    #[error("Redirect limit of {0} reached in one step")]
    RedirectLimit(usize),

    #[error("Return edge {0} followed with an empty call stack")]
    EmptyCallStack(EntityId),

    #[error("Template {name:?} is ambiguous at {address:?}: {candidates:?}")]
    AmbiguousTemplate {
        name: String,
        address: String,
        candidates: Vec<String>,
    },

    #[error("Patch for registry {patch} cannot apply to registry {target}")]
    RegistryMismatch { patch: EntityId, target: EntityId },

    #[error("Patch expects state {expected} but registry is at {actual}")]
    StateHashMismatch { expected: String, actual: String },

    #[error("No snapshot at or before {0}")]
    MissingSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rollback after \"{cause}\" left the graph partially restored: {rollback}")]
    RollbackFailed {
        cause: Box<Error>,
        rollback: GraphError,
    },
}

impl Error {
    /// Convenience for handlers reporting their own failures.
    pub fn handler(task: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Handler {
            task: task.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
