//! # Story Runtime
//!
//! Drives a cursor through a [`story_graph::Graph`]. This crate owns behavior dispatch,
//! the phase-driven frame, dependency provisioning and the replay ledger.
//!
//! ## Core Components
//!
//! - **dispatch**: Ordered, layered handler lookup and result aggregation
//! - **frame**: The fixed VALIDATE → POSTREQS phase cycle for a single step
//! - **provision**: Costed offers that turn open requirements into concrete nodes
//! - **ledger**: Append-only record stream with patches, snapshots, recovery and undo
//! - **journal**: Fragments emitted while a step runs
//!
//! ## Design Philosophy
//!
//! - **Explicit context**: registries live in a [`Runtime`] value threaded into each
//!   frame, never in process-global state
//! - **Explicit commits**: a frame produces a [`StepOutcome`] that the caller folds
//!   into the [`Ledger`] with [`Ledger::commit`]
//! - **Fail closed**: a step either completes or leaves the graph untouched

pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod journal;
pub mod ledger;
pub mod provision;
pub mod runtime;

pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use frame::*;
pub use journal::*;
pub use ledger::*;
pub use provision::*;
pub use runtime::*;

#[cfg(test)]
pub(crate) mod testing;
