//! # Behavior Dispatch
//!
//! Looks up every handler registered for a task across the active layers, orders them
//! deterministically and combines their results with an aggregation strategy.
//!
//! ## Ordering
//!
//! Handlers run by ascending priority, then by how closely their owner kind matches
//! the caller (most specific first, unowned last), then registration sequence, then
//! layer (global, domain, local, inline).

mod aggregate;
mod behavior;
pub mod builtins;

pub use aggregate::{Aggregate, Outcome, Strategy};
pub use behavior::{Behavior, BehaviorId, BehaviorRegistry, HandlerFn, Layer, Priority};

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use story_graph::{Entity, EntityId, EventSink, Graph, KindTable};

use crate::frame::{CallStack, Phase};
use crate::{Error, Result};

/// Everything a handler can see and touch.
pub struct DispatchCtx<'a> {
    pub graph: &'a mut Graph,
    pub sink: &'a mut dyn EventSink,
    /// Entity the task is being dispatched for.
    pub caller: EntityId,
    pub cursor: Option<EntityId>,
    pub phase: Option<Phase>,
    pub step: u64,
    /// Result of `gather_context` for the current cycle.
    pub namespace: &'a Value,
    pub call_stack: &'a CallStack,
    /// Previous handler's result under PIPELINE.
    pub input: Option<Value>,
    layers: &'a Layers<'a>,
}

impl<'a> DispatchCtx<'a> {
    pub fn new(
        layers: &'a Layers<'a>,
        graph: &'a mut Graph,
        sink: &'a mut dyn EventSink,
        caller: EntityId,
        namespace: &'a Value,
        call_stack: &'a CallStack,
    ) -> Self {
        Self {
            graph,
            sink,
            caller,
            cursor: None,
            phase: None,
            step: 0,
            namespace,
            call_stack,
            input: None,
            layers,
        }
    }

    pub fn with_cursor(mut self, cursor: EntityId) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_phase(mut self, phase: Phase, step: u64) -> Self {
        self.phase = Some(phase);
        self.step = step;
        self
    }

    /// Dispatch another task from inside a handler, sharing this context.
    pub fn dispatch(&mut self, task: &str, caller: EntityId, strategy: Strategy) -> Result<Aggregate> {
        let layers = self.layers;
        let mut nested = DispatchCtx {
            graph: &mut *self.graph,
            sink: &mut *self.sink,
            caller,
            cursor: self.cursor,
            phase: self.phase,
            step: self.step,
            namespace: self.namespace,
            call_stack: self.call_stack,
            input: None,
            layers,
        };
        layers.dispatch(task, &mut nested, strategy)
    }

    /// Whether the `check_conditions` handlers allow an item.
    pub fn conditions_hold(&mut self, item: EntityId) -> Result<bool> {
        Ok(self.dispatch(crate::frame::TASK_CHECK_CONDITIONS, item, Strategy::All)?.is_true())
    }
}

/// The set of registries consulted for one dispatch.
#[derive(Debug, Clone)]
pub struct Layers<'a> {
    kinds: &'a KindTable,
    registries: Vec<&'a BehaviorRegistry>,
    locals: Option<&'a BTreeMap<EntityId, BehaviorRegistry>>,
}

impl<'a> Layers<'a> {
    pub fn new(kinds: &'a KindTable, global: &'a BehaviorRegistry) -> Self {
        Self {
            kinds,
            registries: vec![global],
            locals: None,
        }
    }

    /// Add a registry to the union.
    pub fn with(mut self, registry: &'a BehaviorRegistry) -> Self {
        self.registries.push(registry);
        self
    }

    /// Per-entity registries, consulted for the caller only.
    pub fn with_locals(mut self, locals: &'a BTreeMap<EntityId, BehaviorRegistry>) -> Self {
        self.locals = Some(locals);
        self
    }

    pub fn kinds(&self) -> &KindTable {
        self.kinds
    }

    /// Applicable behaviors for a task, deduplicated and in execution order.
    pub fn resolve(&self, task: &str, caller: Option<&Entity>) -> Vec<Arc<Behavior>> {
        let caller_depth = caller.and_then(|c| self.kinds.depth(&c.kind));
        let local = caller.and_then(|c| self.locals.and_then(|locals| locals.get(&c.id)));

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for registry in self.registries.iter().copied().chain(local) {
            for behavior in registry.for_task(task) {
                if behavior.applies_to(self.kinds, caller) && seen.insert(behavior.id()) {
                    found.push(Arc::clone(behavior));
                }
            }
        }

        found.sort_by_key(|b| (b.priority(), b.distance(caller_depth), b.seq(), b.layer()));
        found
    }

    /// Run every applicable handler for `task` and combine the results.
    ///
    /// Handler errors propagate unchanged.
    pub fn dispatch(&self, task: &str, ctx: &mut DispatchCtx<'_>, strategy: Strategy) -> Result<Aggregate> {
        let caller = ctx.graph.get(ctx.caller).map(|item| item.entity().clone());
        let behaviors = self.resolve(task, caller.as_ref());
        tracing::debug!(
            task,
            caller = %ctx.caller,
            handlers = behaviors.len(),
            strategy = ?strategy,
            "dispatch"
        );

        match strategy {
            Strategy::Pipeline => {
                for behavior in &behaviors {
                    match invoke(task, behavior, ctx)? {
                        Some(Outcome::Value(value)) => ctx.input = Some(value),
                        Some(Outcome::Follow(edge)) => {
                            tracing::warn!(task, edge = %edge, "follow outcome ignored in PIPELINE");
                        }
                        None => {}
                    }
                }
                Ok(Aggregate::Piped(ctx.input.take()))
            }
            Strategy::First => {
                for behavior in &behaviors {
                    if let Some(outcome) = invoke(task, behavior, ctx)? {
                        return Ok(Aggregate::First(Some(outcome)));
                    }
                }
                Ok(Aggregate::First(None))
            }
            Strategy::Gather | Strategy::Merge | Strategy::All => {
                let mut outcomes = Vec::new();
                for behavior in &behaviors {
                    match invoke(task, behavior, ctx)? {
                        Some(Outcome::Value(Value::Null)) | None => {}
                        Some(outcome) => outcomes.push(outcome),
                    }
                }
                Ok(match strategy {
                    Strategy::Merge => aggregate::merge(task, outcomes),
                    Strategy::All => Aggregate::All(outcomes.iter().all(Outcome::is_truthy)),
                    _ => Aggregate::Gathered(outcomes),
                })
            }
        }
    }

    /// FIRST dispatch that fails when no handler answers.
    pub fn require_first(&self, task: &str, ctx: &mut DispatchCtx<'_>) -> Result<Outcome> {
        match self.dispatch(task, ctx, Strategy::First)? {
            Aggregate::First(Some(outcome)) => Ok(outcome),
            _ => Err(Error::NoHandler(task.to_string())),
        }
    }

    /// Dispatch with extra handlers supplied for this call only.
    pub fn dispatch_with(
        &self,
        inline: &BehaviorRegistry,
        task: &str,
        ctx: &mut DispatchCtx<'_>,
        strategy: Strategy,
    ) -> Result<Aggregate> {
        self.clone().with(inline).dispatch(task, ctx, strategy)
    }
}

fn invoke(task: &str, behavior: &Behavior, ctx: &mut DispatchCtx<'_>) -> Result<Option<Outcome>> {
    behavior.call(ctx).map_err(|err| {
        tracing::warn!(task, behavior = behavior.name(), error = %err, "handler failed");
        err
    })
}
