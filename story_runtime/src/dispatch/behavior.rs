//! Behaviors and the registries that hold them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use story_graph::{Criteria, Entity, KindTable};
use uuid::Uuid;

use super::{DispatchCtx, Outcome};
use crate::Result;

/// Unique identifier for a registered behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BehaviorId(pub Uuid);

impl BehaviorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BehaviorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handler priority. Lower runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub const FIRST: Priority = Priority(0);
    pub const EARLY: Priority = Priority(25);
    pub const NORMAL: Priority = Priority(50);
    pub const LATE: Priority = Priority(75);
    pub const LAST: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// Where a registry sits in the dispatch union. Also the final ordering tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Always present.
    Global,
    /// Named story-level registries activated by a ledger.
    Domain,
    /// Behaviors attached to one entity.
    Local,
    /// Extra handlers supplied for a single call.
    Inline,
}

pub type HandlerFn = dyn Fn(&mut DispatchCtx<'_>) -> Result<Option<Outcome>> + Send + Sync;

/// A handler bound to a task.
///
/// Built with the `with_*` methods and then handed to a [`BehaviorRegistry`], which
/// assigns the sequence number and specialization rank. Once registered it is shared
/// behind an `Arc` and never changes.
pub struct Behavior {
    id: BehaviorId,
    name: String,
    task: String,
    priority: Priority,
    owner_kind: Option<String>,
    criteria: Option<Criteria>,
    seq: u64,
    specificity: u32,
    layer: Layer,
    handler: Arc<HandlerFn>,
}

impl Behavior {
    /// Create a behavior for a task.
    pub fn new<F>(task: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut DispatchCtx<'_>) -> Result<Option<Outcome>> + Send + Sync + 'static,
    {
        let task = task.into();
        Self {
            id: BehaviorId::new(),
            name: task.clone(),
            task,
            priority: Priority::NORMAL,
            owner_kind: None,
            criteria: None,
            seq: 0,
            specificity: 0,
            layer: Layer::Global,
            handler: Arc::new(handler),
        }
    }

    /// Human-readable name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict to callers of this kind or its descendants.
    pub fn for_kind(mut self, kind: impl Into<String>) -> Self {
        self.owner_kind = Some(kind.into());
        self
    }

    /// Restrict to callers satisfying the criteria.
    pub fn matching(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn id(&self) -> BehaviorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn owner_kind(&self) -> Option<&str> {
        self.owner_kind.as_deref()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Depth of the owner kind in the kind table, fixed at registration.
    pub fn specificity(&self) -> u32 {
        self.specificity
    }

    /// Whether this behavior applies to a caller.
    pub fn applies_to(&self, kinds: &KindTable, caller: Option<&Entity>) -> bool {
        match (caller, &self.owner_kind, &self.criteria) {
            (_, None, None) => true,
            (None, _, _) => false,
            (Some(caller), owner, criteria) => {
                owner
                    .as_deref()
                    .map(|owner| kinds.is_a(&caller.kind, owner))
                    .unwrap_or(true)
                    && criteria.as_ref().map(|c| c.matches(caller)).unwrap_or(true)
            }
        }
    }

    /// Distance from the caller's kind to the owner kind. Unowned behaviors rank last.
    pub fn distance(&self, caller_depth: Option<u32>) -> u32 {
        match (&self.owner_kind, caller_depth) {
            (None, _) => u32::MAX,
            (Some(_), Some(depth)) => depth.saturating_sub(self.specificity),
            (Some(_), None) => 0,
        }
    }

    pub fn call(&self, ctx: &mut DispatchCtx<'_>) -> Result<Option<Outcome>> {
        (self.handler)(ctx)
    }
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Behavior")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("task", &self.task)
            .field("priority", &self.priority)
            .field("owner_kind", &self.owner_kind)
            .field("seq", &self.seq)
            .field("layer", &self.layer)
            .finish()
    }
}

/// An ordered collection of registered behaviors.
#[derive(Debug, Clone)]
pub struct BehaviorRegistry {
    name: String,
    layer: Layer,
    kinds: Arc<KindTable>,
    behaviors: Vec<Arc<Behavior>>,
    /// Source of registration sequence numbers. Registries that share it order
    /// against each other by registration time.
    sequence: Arc<AtomicU64>,
}

impl BehaviorRegistry {
    pub fn new(name: impl Into<String>, layer: Layer, kinds: Arc<KindTable>) -> Self {
        Self {
            name: name.into(),
            layer,
            kinds,
            behaviors: Vec::new(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Draw sequence numbers from a counter shared with other registries.
    pub fn sharing_sequence(mut self, sequence: Arc<AtomicU64>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Register a behavior, fixing its sequence number, layer and specialization rank.
    pub fn register(&mut self, mut behavior: Behavior) -> BehaviorId {
        behavior.seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        behavior.layer = self.layer;
        behavior.specificity = behavior
            .owner_kind
            .as_deref()
            .and_then(|kind| self.kinds.depth(kind))
            .unwrap_or(0);

        tracing::debug!(
            registry = %self.name,
            behavior = %behavior.name,
            task = %behavior.task,
            seq = behavior.seq,
            "behavior registered"
        );
        let id = behavior.id;
        self.behaviors.push(Arc::new(behavior));
        id
    }

    /// Builder form of [`BehaviorRegistry::register`].
    pub fn with(mut self, behavior: Behavior) -> Self {
        self.register(behavior);
        self
    }

    /// Registered behaviors for a task, in registration order.
    pub fn for_task<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a Arc<Behavior>> + 'a {
        self.behaviors.iter().filter(move |b| b.task == task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_graph::{KIND_NODE, KIND_SUBGRAPH};

    fn noop(task: &str) -> Behavior {
        Behavior::new(task, |_ctx| Ok(None))
    }

    #[test]
    fn test_symbolic_priorities_are_ordered() {
        assert!(Priority::FIRST < Priority::EARLY);
        assert!(Priority::EARLY < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::LATE);
        assert!(Priority::LATE < Priority::LAST);
        assert!(Priority(-5) < Priority::FIRST);
    }

    #[test]
    fn test_registration_assigns_seq_and_rank() {
        let kinds = Arc::new(KindTable::new());
        let mut registry = BehaviorRegistry::new("global", Layer::Global, kinds);
        registry.register(noop("render"));
        registry.register(noop("render").for_kind(KIND_SUBGRAPH));
        registry.register(noop("avail"));

        let render: Vec<_> = registry.for_task("render").collect();
        assert_eq!(render.len(), 2);
        assert_eq!(render[0].seq(), 0);
        assert_eq!(render[1].seq(), 1);
        assert_eq!(render[1].specificity(), 2);
        assert_eq!(render[1].layer(), Layer::Global);
    }

    #[test]
    fn test_shared_sequence_spans_registries() {
        let kinds = Arc::new(KindTable::new());
        let sequence = Arc::new(AtomicU64::new(0));
        let mut global = BehaviorRegistry::new("global", Layer::Global, Arc::clone(&kinds))
            .sharing_sequence(Arc::clone(&sequence));
        let mut domain = BehaviorRegistry::new("mystery", Layer::Domain, kinds)
            .sharing_sequence(Arc::clone(&sequence));
        global.register(noop("render"));
        domain.register(noop("render"));
        global.register(noop("render"));

        let seqs = |registry: &BehaviorRegistry| registry.for_task("render").map(|b| b.seq()).collect::<Vec<_>>();
        assert_eq!(seqs(&global), vec![0, 2]);
        assert_eq!(seqs(&domain), vec![1]);
        assert_eq!(sequence.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_applicability() {
        let kinds = KindTable::new();
        let subgraph = Entity::new(KIND_SUBGRAPH);
        let node = Entity::new(KIND_NODE);

        let for_nodes = noop("render").for_kind(KIND_NODE);
        assert!(for_nodes.applies_to(&kinds, Some(&subgraph)));
        assert!(for_nodes.applies_to(&kinds, Some(&node)));
        assert!(!for_nodes.applies_to(&kinds, None));

        let for_subgraphs = noop("render").for_kind(KIND_SUBGRAPH);
        assert!(!for_subgraphs.applies_to(&kinds, Some(&node)));

        let tagged = noop("render").matching(Criteria::new().with_tag("lit"));
        assert!(!tagged.applies_to(&kinds, Some(&node)));
        assert!(noop("render").applies_to(&kinds, None));
    }
}
