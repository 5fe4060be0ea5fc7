//! # Story Graph
//!
//! The registry layer of the narrative runtime - typed nodes, edges and subgraphs
//! scoped to one story instance. This crate is the single source of truth for graph
//! structure and does not contain any dispatch or phase logic.
//!
//! ## Core Components
//!
//! - **entity**: Identity, kinds (the static type table) and match criteria
//! - **item**: Nodes, edges and subgraphs stored in the graph
//! - **requirement**: Declarative descriptions of what must fill a dynamic edge
//! - **events**: Mutation events and the sinks that capture them
//! - **graph**: The registry itself, with link validation and state hashing
//!
//! Every mutating operation takes an explicit [`EventSink`], so a caller always knows
//! whether (and where) a mutation is being recorded.

pub mod entity;
pub mod error;
pub mod events;
pub mod graph;
pub mod item;
pub mod requirement;

pub use entity::*;
pub use error::*;
pub use events::*;
pub use graph::*;
pub use item::*;
pub use requirement::*;
