//! The fixed resolution phases and the task names they dispatch.

use serde::{Deserialize, Serialize};

use crate::dispatch::Strategy;

pub const TASK_AVAILABLE: &str = "avail";
pub const TASK_CHECK_CONDITIONS: &str = "check_conditions";
pub const TASK_GATHER_CONTEXT: &str = "gather_context";
pub const TASK_PLANNING: &str = "planning";
pub const TASK_PREREQS: &str = "prereqs";
pub const TASK_APPLY_EFFECTS: &str = "apply_effects";
pub const TASK_RENDER: &str = "render";
pub const TASK_FINALIZE: &str = "finalize";
pub const TASK_POSTREQS: &str = "postreqs";

/// One stage of a step. The order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Validate,
    Planning,
    Prereqs,
    Update,
    Journal,
    Finalize,
    Postreqs,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Validate,
        Phase::Planning,
        Phase::Prereqs,
        Phase::Update,
        Phase::Journal,
        Phase::Finalize,
        Phase::Postreqs,
    ];

    /// Task dispatched on the cursor during this phase.
    pub fn task(&self) -> &'static str {
        match self {
            Phase::Validate => TASK_AVAILABLE,
            Phase::Planning => TASK_PLANNING,
            Phase::Prereqs => TASK_PREREQS,
            Phase::Update => TASK_APPLY_EFFECTS,
            Phase::Journal => TASK_RENDER,
            Phase::Finalize => TASK_FINALIZE,
            Phase::Postreqs => TASK_POSTREQS,
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Phase::Validate => Strategy::All,
            _ => Strategy::Gather,
        }
    }

    /// Whether a `Follow` outcome in this phase moves the cursor.
    pub fn can_redirect(&self) -> bool {
        matches!(self, Phase::Prereqs | Phase::Postreqs)
    }

    pub fn next(&self) -> Option<Phase> {
        let index = Phase::ALL.iter().position(|phase| phase == self)?;
        Phase::ALL.get(index + 1).copied()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Validate => "VALIDATE",
            Phase::Planning => "PLANNING",
            Phase::Prereqs => "PREREQS",
            Phase::Update => "UPDATE",
            Phase::Journal => "JOURNAL",
            Phase::Finalize => "FINALIZE",
            Phase::Postreqs => "POSTREQS",
        };
        write!(f, "{}", name)
    }
}
