//! # Frame
//!
//! Runs one step: moves the cursor and walks the fixed phase cycle on the new node.
//!
//! ## Cycle
//!
//! `VALIDATE → PLANNING → PREREQS → UPDATE → JOURNAL → FINALIZE → POSTREQS`
//!
//! A `Follow` outcome in PREREQS or POSTREQS moves the cursor along that edge and
//! starts the cycle again. Any error undoes every mutation the step recorded.

mod phase;
mod stack;

pub use phase::{
    Phase, TASK_APPLY_EFFECTS, TASK_AVAILABLE, TASK_CHECK_CONDITIONS, TASK_FINALIZE,
    TASK_GATHER_CONTEXT, TASK_PLANNING, TASK_POSTREQS, TASK_PREREQS, TASK_RENDER,
};
pub use stack::{CallStack, StackFrame};

use serde_json::{json, Value};
use story_graph::{EdgeKind, EntityId, Event, Graph, GraphError, Watcher};

use crate::dispatch::{Aggregate, BehaviorRegistry, DispatchCtx, Layers, Outcome, Strategy};
use crate::journal::{Fragment, FRAGMENT_CHOICE_MENU};
use crate::ledger::{Patch, Record, RecordBody, CHANNEL_GRAPH, CHANNEL_JOURNAL, CHANNEL_PLANNING, CHANNEL_STACK};
use crate::provision::PlanningReceipt;
use crate::runtime::Runtime;
use crate::{Error, Result};

/// What ran in one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReceipt {
    pub phase: Phase,
    pub cursor: EntityId,
    pub results: Aggregate,
    /// Edge a handler asked to follow. Only set in PREREQS and POSTREQS.
    pub redirect: Option<EntityId>,
}

/// Everything a finished step hands back to the ledger.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub cursor: EntityId,
    pub step: u64,
    /// Nodes entered during the step, in order.
    pub history: Vec<EntityId>,
    pub call_stack: CallStack,
    /// Unnumbered records produced by the step.
    pub records: Vec<Record>,
    /// Receipt of the last planning pass.
    pub planning: Option<PlanningReceipt>,
}

impl StepOutcome {
    pub fn fragments(&self) -> Vec<&Fragment> {
        self.records.iter().filter_map(Record::as_fragment).collect()
    }
}

enum Target {
    Node(EntityId),
    Edge(EntityId),
    Choice(EntityId),
}

/// Transient context for a single step.
pub struct Frame<'r> {
    runtime: &'r Runtime,
    domains: Vec<&'r BehaviorRegistry>,
    graph: &'r mut Graph,
    cursor: EntityId,
    step: u64,
    phase: Option<Phase>,
    history: Vec<EntityId>,
    call_stack: CallStack,
    watcher: Watcher,
    graph_checkpoint: String,
    stack_checkpoint: String,
    namespace: Value,
    receipts: Vec<PhaseReceipt>,
    records: Vec<Record>,
    planning: Option<PlanningReceipt>,
    event_sourced: bool,
}

impl<'r> Frame<'r> {
    pub fn new(runtime: &'r Runtime, graph: &'r mut Graph, cursor: EntityId) -> Result<Self> {
        let call_stack = CallStack::new();
        Ok(Self {
            runtime,
            domains: Vec::new(),
            graph_checkpoint: graph.state_hash()?,
            stack_checkpoint: call_stack.state_hash()?,
            graph,
            cursor,
            step: 0,
            phase: None,
            history: Vec::new(),
            call_stack,
            watcher: Watcher::new(),
            namespace: Value::Null,
            receipts: Vec::new(),
            records: Vec::new(),
            planning: None,
            event_sourced: runtime.config().event_sourced,
        })
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_call_stack(mut self, call_stack: CallStack) -> Result<Self> {
        self.stack_checkpoint = call_stack.state_hash()?;
        self.call_stack = call_stack;
        Ok(self)
    }

    /// Activate named domain registries for this step.
    pub fn with_domains(mut self, names: &[String]) -> Self {
        self.domains = self.runtime.domains(names);
        self
    }

    pub fn event_sourced(mut self, event_sourced: bool) -> Self {
        self.event_sourced = event_sourced;
        self
    }

    pub fn cursor(&self) -> EntityId {
        self.cursor
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn receipts(&self) -> &[PhaseReceipt] {
        &self.receipts
    }

    /// The context namespace gathered for the current cycle.
    pub fn namespace(&self) -> &Value {
        &self.namespace
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Follow an edge and run the cycle on its destination.
    pub fn follow_edge(self, edge: EntityId) -> Result<StepOutcome> {
        self.run(Target::Edge(edge))
    }

    /// Follow a choice the player picked from the menu.
    ///
    /// The edge must be an available choice leaving the cursor.
    pub fn resolve_choice(self, edge: EntityId) -> Result<StepOutcome> {
        self.run(Target::Choice(edge))
    }

    /// Move straight to a node without following an edge.
    pub fn jump_to(self, node: EntityId) -> Result<StepOutcome> {
        self.run(Target::Node(node))
    }

    fn run(mut self, target: Target) -> Result<StepOutcome> {
        match self.drive(target) {
            Ok(()) => self.finish(),
            Err(err) => {
                tracing::warn!(cursor = %self.cursor, error = %err, "step failed; rolling back");
                match self.rollback() {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(Error::RollbackFailed {
                        cause: Box::new(err),
                        rollback,
                    }),
                }
            }
        }
    }

    fn drive(&mut self, first: Target) -> Result<()> {
        let max_redirects = self.runtime.config().max_redirects;
        let mut target = first;
        let mut redirects = 0;
        loop {
            let node = match target {
                Target::Node(node) => node,
                Target::Edge(edge) => self.traverse(edge)?,
                Target::Choice(edge) => {
                    self.check_choice(edge)?;
                    self.traverse(edge)?
                }
            };
            self.enter(node)?;
            match self.cycle()? {
                None => return Ok(()),
                Some(edge) => {
                    redirects += 1;
                    if redirects > max_redirects {
                        return Err(Error::RedirectLimit(max_redirects));
                    }
                    target = Target::Edge(edge);
                }
            }
        }
    }

    fn check_choice(&mut self, edge: EntityId) -> Result<()> {
        let offered = self
            .graph
            .edge(edge)
            .map(|e| e.edge_kind == EdgeKind::Choice && e.source == self.cursor && e.is_resolved())
            .unwrap_or(false);
        if offered && self.conditions_hold(edge)? {
            Ok(())
        } else {
            Err(Error::NotAChoice {
                edge,
                cursor: self.cursor,
            })
        }
    }

    /// Call/return bookkeeping for an edge; returns its destination.
    fn traverse(&mut self, edge_id: EntityId) -> Result<EntityId> {
        let edge = self.graph.require_edge(edge_id)?.clone();
        let destination = edge.destination.ok_or(Error::UnresolvedEdge(edge_id))?;

        if edge.edge_kind == EdgeKind::Return {
            if self.call_stack.pop(&mut self.watcher)?.is_none() {
                return Err(Error::EmptyCallStack(edge_id));
            }
        } else if edge.is_call {
            let return_cursor = edge.return_to.unwrap_or(edge.source);
            self.call_stack
                .push(return_cursor, edge.edge_kind, edge_id, &mut self.watcher)?;
        }
        Ok(destination)
    }

    /// VALIDATE a candidate and, if it is available, make it the cursor.
    pub fn enter(&mut self, node: EntityId) -> Result<()> {
        self.graph.require(node)?;
        self.phase = Some(Phase::Validate);
        let available = self.dispatch(TASK_AVAILABLE, node, Strategy::All)?;
        let is_available = available.is_true();
        self.receipts.push(PhaseReceipt {
            phase: Phase::Validate,
            cursor: node,
            results: available,
            redirect: None,
        });
        if !is_available {
            return Err(Error::Unavailable(node));
        }

        self.cursor = node;
        self.history.push(node);
        self.step += 1;
        tracing::info!(cursor = %node, step = self.step, "entered node");
        Ok(())
    }

    /// Everything after VALIDATE. Returns an edge to follow when a phase redirects.
    fn cycle(&mut self) -> Result<Option<EntityId>> {
        self.namespace = self
            .dispatch(TASK_GATHER_CONTEXT, self.cursor, Strategy::Merge)?
            .into_value();

        for phase in Phase::ALL.into_iter().skip(1) {
            let receipt = self.run_phase(phase)?;
            if let Some(edge) = receipt.redirect {
                tracing::debug!(%phase, edge = %edge, "redirect");
                return Ok(Some(edge));
            }
        }
        Ok(None)
    }

    /// Run a single phase on the current cursor.
    pub fn run_phase(&mut self, phase: Phase) -> Result<PhaseReceipt> {
        self.phase = Some(phase);
        let cursor = self.cursor;
        tracing::debug!(%phase, cursor = %cursor, step = self.step, "phase");

        let results = match phase {
            Phase::Planning => {
                let receipt = self.runtime.planner().plan(self.graph, cursor, &mut self.watcher)?;
                self.records.push(Record::new(
                    CHANNEL_PLANNING,
                    self.step,
                    RecordBody::PlanningReceipt(receipt.clone()),
                ));
                self.planning = Some(receipt);
                self.dispatch(phase.task(), cursor, phase.strategy())?
            }
            Phase::Journal => {
                let fragments = self.journal()?;
                let mut outcomes = Vec::with_capacity(fragments.len());
                for fragment in fragments {
                    outcomes.push(Outcome::Value(serde_json::to_value(&fragment)?));
                    self.records.push(Record::new(
                        CHANNEL_JOURNAL,
                        self.step,
                        RecordBody::Fragment(fragment),
                    ));
                }
                Aggregate::Gathered(outcomes)
            }
            Phase::Finalize => {
                let hooks = self.dispatch(phase.task(), cursor, phase.strategy())?;
                self.flush_patches()?;
                hooks
            }
            _ => self.dispatch(phase.task(), cursor, phase.strategy())?,
        };

        let redirect = if phase.can_redirect() {
            results.redirect()
        } else {
            None
        };
        let receipt = PhaseReceipt {
            phase,
            cursor,
            results,
            redirect,
        };
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Fragments for the cursor, in journal order.
    fn journal(&mut self) -> Result<Vec<Fragment>> {
        let cursor = self.cursor;
        let mut fragments = Vec::new();

        if let Some(content) = self.graph.node(cursor).and_then(|node| node.content.clone()) {
            fragments.push(Fragment::text(content, cursor));
        }
        for value in self.dispatch(TASK_RENDER, cursor, Strategy::Gather)?.values() {
            fragments.extend(Fragment::from_render(value, cursor));
        }

        let concepts: Vec<EntityId> = self
            .graph
            .edges_from(cursor)
            .into_iter()
            .filter(|edge| matches!(edge.edge_kind, EdgeKind::Dependency | EdgeKind::Affordance))
            .filter_map(|edge| edge.destination)
            .collect();
        for concept in concepts {
            for value in self.dispatch(TASK_RENDER, concept, Strategy::Gather)?.values() {
                fragments.extend(Fragment::from_render(value, concept));
            }
        }

        let choices = self.available_choices()?;
        if !choices.is_empty() {
            let menu: Vec<Value> = choices
                .iter()
                .filter_map(|id| self.graph.edge(*id))
                .map(|edge| {
                    json!({
                        "edge_id": edge.id(),
                        "label": edge.entity.display_name(),
                        "destination": edge.destination,
                    })
                })
                .collect();
            fragments.push(Fragment::new(
                FRAGMENT_CHOICE_MENU,
                json!({ "choices": menu }),
                Some(cursor),
            ));
        }
        Ok(fragments)
    }

    /// Resolved outgoing choices whose conditions hold.
    pub fn available_choices(&mut self) -> Result<Vec<EntityId>> {
        let candidates: Vec<EntityId> = self
            .graph
            .edges_from(self.cursor)
            .into_iter()
            .filter(|edge| edge.edge_kind == EdgeKind::Choice && edge.is_resolved())
            .map(|edge| edge.id())
            .collect();

        let mut available = Vec::new();
        for edge in candidates {
            if self.conditions_hold(edge)? {
                available.push(edge);
            }
        }
        Ok(available)
    }

    fn conditions_hold(&mut self, edge: EntityId) -> Result<bool> {
        Ok(self
            .dispatch(TASK_CHECK_CONDITIONS, edge, Strategy::All)?
            .is_true())
    }

    fn layers(&self) -> Layers<'r> {
        let runtime = self.runtime;
        self.domains.iter().copied().fold(
            Layers::new(runtime.kinds(), runtime.global()).with_locals(runtime.locals()),
            Layers::with,
        )
    }

    fn dispatch(&mut self, task: &str, caller: EntityId, strategy: Strategy) -> Result<Aggregate> {
        let layers = self.layers();
        let mut ctx = DispatchCtx::new(
            &layers,
            &mut *self.graph,
            &mut self.watcher,
            caller,
            &self.namespace,
            &self.call_stack,
        )
        .with_cursor(self.cursor);
        if let Some(phase) = self.phase {
            ctx = ctx.with_phase(phase, self.step);
        }
        layers.dispatch(task, &mut ctx, strategy)
    }

    /// Package events since the last checkpoint, one patch per registry.
    fn flush_patches(&mut self) -> Result<()> {
        let batch = self.watcher.take_batch();
        if !self.event_sourced || batch.is_empty() {
            return Ok(());
        }
        let (stack_events, graph_events): (Vec<Event>, Vec<Event>) =
            batch.into_iter().partition(Event::is_stack_event);

        if !graph_events.is_empty() {
            let hash = self.graph.state_hash()?;
            let checkpoint = std::mem::replace(&mut self.graph_checkpoint, hash);
            self.records.push(Record::new(
                CHANNEL_GRAPH,
                self.step,
                RecordBody::Patch(Patch::new(self.graph.uid(), checkpoint, graph_events)),
            ));
        }
        if !stack_events.is_empty() {
            let hash = self.call_stack.state_hash()?;
            let checkpoint = std::mem::replace(&mut self.stack_checkpoint, hash);
            self.records.push(Record::new(
                CHANNEL_STACK,
                self.step,
                RecordBody::Patch(Patch::new(self.call_stack.uid(), checkpoint, stack_events)),
            ));
        }
        tracing::debug!(step = self.step, "patches packaged");
        Ok(())
    }

    /// Undo everything recorded during this step.
    ///
    /// Every inverse is attempted; the first failure is returned.
    fn rollback(&mut self) -> std::result::Result<(), GraphError> {
        let mut first_failure = None;
        for event in self.watcher.rollback_events() {
            if event.is_stack_event() {
                continue;
            }
            if let Err(err) = self.graph.apply_event(&event) {
                tracing::error!(target_id = %event.target, error = %err, "rollback event failed");
                first_failure.get_or_insert(err);
            }
        }
        self.watcher.clear();
        first_failure.map_or(Ok(()), Err)
    }

    fn finish(mut self) -> Result<StepOutcome> {
        self.flush_patches()?;
        Ok(StepOutcome {
            cursor: self.cursor,
            step: self.step,
            history: self.history,
            call_stack: self.call_stack,
            records: self.records,
            planning: self.planning,
        })
    }
}
