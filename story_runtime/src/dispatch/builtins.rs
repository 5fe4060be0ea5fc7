//! Behaviors every runtime registers globally.
//!
//! They give redirect and continue edges their automatic meaning and unwind call
//! frames when a called node has nowhere left to go.

use story_graph::{Edge, EdgeKind, EntityId};

use super::{Behavior, BehaviorRegistry, DispatchCtx, Outcome, Priority};
use crate::frame::{TASK_POSTREQS, TASK_PREREQS};
use crate::Result;

/// Follow the first available redirect edge when a node is entered.
pub fn follow_redirects() -> Behavior {
    Behavior::new(TASK_PREREQS, |ctx| follow_first(ctx, EdgeKind::Redirect))
        .named("follow_redirects")
        .with_priority(Priority::LATE)
}

/// Follow the first available continue edge once a node is done.
pub fn follow_continues() -> Behavior {
    Behavior::new(TASK_POSTREQS, |ctx| follow_first(ctx, EdgeKind::Continue))
        .named("follow_continues")
        .with_priority(Priority::LATE)
}

/// Leave a called subroutine from a terminal node.
pub fn return_from_call() -> Behavior {
    Behavior::new(TASK_POSTREQS, return_to_caller)
        .named("return_from_call")
        .with_priority(Priority::LAST)
}

/// Register all built-in behaviors.
pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(follow_redirects());
    registry.register(follow_continues());
    registry.register(return_from_call());
}

fn follow_first(ctx: &mut DispatchCtx<'_>, kind: EdgeKind) -> Result<Option<Outcome>> {
    let candidates: Vec<EntityId> = ctx
        .graph
        .edges_from(ctx.caller)
        .into_iter()
        .filter(|edge| edge.edge_kind == kind && edge.is_resolved())
        .map(Edge::id)
        .collect();

    for edge in candidates {
        if ctx.conditions_hold(edge)? {
            tracing::debug!(edge = %edge, kind = ?kind, "automatic edge");
            return Ok(Some(Outcome::Follow(edge)));
        }
    }
    Ok(None)
}

fn return_to_caller(ctx: &mut DispatchCtx<'_>) -> Result<Option<Outcome>> {
    let Some(frame) = ctx.call_stack.peek() else {
        return Ok(None);
    };
    let return_cursor = frame.return_cursor;

    let terminal = !ctx.graph.edges_from(ctx.caller).iter().any(|edge| {
        edge.is_resolved()
            && matches!(
                edge.edge_kind,
                EdgeKind::Choice | EdgeKind::Continue | EdgeKind::Redirect
            )
    });
    if !terminal {
        return Ok(None);
    }

    let edge = Edge::new(ctx.caller, return_cursor, EdgeKind::Return).with_label("return");
    let id = ctx.graph.add_edge(edge, ctx.sink)?;
    tracing::debug!(from = %ctx.caller, to = %return_cursor, "returning from call");
    Ok(Some(Outcome::Follow(id)))
}
