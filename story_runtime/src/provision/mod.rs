//! # Provisioning
//!
//! Turns open requirements on dynamic edges into concrete nodes.
//!
//! ## Core Components
//!
//! - **Provisioner**: Source of costed [`Offer`]s for a requirement
//! - **Planner**: Walks the frontier, ranks offers and binds the first that succeeds
//! - **TemplateRegistry**: Address-scoped creation templates
//! - **PlanningReceipt**: What one pass attached, created, gave up on or waived

mod offer;
mod provisioners;
mod template;

pub use offer::{AcceptFn, Cost, Offer, ProvisionLayer};
pub use provisioners::{
    AffordanceProvisioner, GraphProvisioner, TemplateProvisioner, TokenProvisioner, ATTR_TOKEN_OF,
    TAG_AFFORDANCE,
};
pub use template::{ScopePattern, Template, TemplateRegistry};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use story_graph::{EntityId, Event, EventSink, Graph, Node, Operation, Requirement};

use crate::Result;

/// A source of offers.
pub trait Provisioner: Send + Sync {
    /// Stable identifier recorded in build receipts.
    fn id(&self) -> &str;

    fn layer(&self) -> ProvisionLayer {
        ProvisionLayer::Global
    }

    /// Offers for one open requirement. Offers the requirement's policy forbids are
    /// dropped by the planner.
    fn offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>>;
}

/// Read-only view handed to provisioners.
pub struct ProvisionCtx<'a> {
    pub graph: &'a Graph,
    pub cursor: EntityId,
    /// Source of the edge being provisioned.
    pub source: EntityId,
    /// The cursor's container, where new nodes are placed.
    pub scene: Option<EntityId>,
    /// Dotted path of the cursor, used for template scopes.
    pub address: &'a str,
    pub templates: &'a TemplateRegistry,
    pub strict: bool,
    distances: &'a BTreeMap<EntityId, u32>,
}

impl<'a> ProvisionCtx<'a> {
    /// Hops from the cursor. Unreachable items are as far as possible.
    pub fn proximity(&self, id: EntityId) -> u32 {
        self.distances.get(&id).copied().unwrap_or(u32::MAX)
    }

    /// Nodes the requirement matches, excluding the edge's own source.
    pub fn candidates(&self, requirement: &Requirement) -> Vec<&'a Node> {
        self.graph
            .nodes()
            .into_iter()
            .filter(|node| node.id() != self.source && requirement.matches(node))
            .collect()
    }
}

/// One accept attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReceipt {
    pub requirement_id: EntityId,
    pub provisioner_id: String,
    pub operation: Operation,
    pub accepted: bool,
    pub node_id: Option<EntityId>,
    pub reason: Option<String>,
}

/// Summary of one planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningReceipt {
    pub cursor_id: EntityId,
    pub attached: Vec<EntityId>,
    pub created: Vec<EntityId>,
    pub unresolved_hard_requirements: Vec<EntityId>,
    pub waived_soft_requirements: Vec<EntityId>,
    pub builds: Vec<BuildReceipt>,
}

impl PlanningReceipt {
    pub fn new(cursor_id: EntityId) -> Self {
        Self {
            cursor_id,
            attached: Vec::new(),
            created: Vec::new(),
            unresolved_hard_requirements: Vec::new(),
            waived_soft_requirements: Vec::new(),
            builds: Vec::new(),
        }
    }

    fn unresolved(&mut self, requirement: EntityId) {
        if !self.unresolved_hard_requirements.contains(&requirement) {
            self.unresolved_hard_requirements.push(requirement);
        }
    }
}

/// Resolves the open edges around a cursor.
pub struct Planner<'a> {
    provisioners: &'a [Box<dyn Provisioner>],
    templates: &'a TemplateRegistry,
    strict: bool,
}

impl<'a> Planner<'a> {
    pub fn new(provisioners: &'a [Box<dyn Provisioner>], templates: &'a TemplateRegistry) -> Self {
        Self {
            provisioners,
            templates,
            strict: true,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Dynamic edges reachable from the cursor that still lack a provider.
    ///
    /// Walks outgoing edges in insertion order, stepping through resolved
    /// destinations. Open edges are collected but never crossed.
    pub fn frontier(graph: &Graph, cursor: EntityId) -> Vec<EntityId> {
        let mut visited = HashSet::from([cursor]);
        let mut queue = VecDeque::from([cursor]);
        let mut open = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in graph.edges_from(current) {
                match (&edge.requirement, edge.destination) {
                    (Some(requirement), None) if !requirement.satisfied() => open.push(edge.id()),
                    (_, Some(destination)) => {
                        if visited.insert(destination) {
                            queue.push_back(destination);
                        }
                    }
                    _ => {}
                }
            }
        }
        open
    }

    /// Run one pass over the frontier.
    pub fn plan(&self, graph: &mut Graph, cursor: EntityId, sink: &mut dyn EventSink) -> Result<PlanningReceipt> {
        let mut receipt = PlanningReceipt::new(cursor);
        let frontier = Self::frontier(graph, cursor);
        if frontier.is_empty() {
            return Ok(receipt);
        }

        let address = graph.path(cursor);
        let distances = graph.distances_from(cursor);
        let scene = graph.get(cursor).and_then(|item| item.parent());

        for edge_id in frontier {
            let edge = graph.require_edge(edge_id)?;
            let source = edge.source;
            let Some(requirement) = edge.requirement.clone() else {
                continue;
            };
            if requirement.is_unresolvable {
                if requirement.hard {
                    receipt.unresolved(requirement.id);
                }
                continue;
            }

            let offers = {
                let ctx = ProvisionCtx {
                    graph: &*graph,
                    cursor,
                    source,
                    scene,
                    address: &address,
                    templates: self.templates,
                    strict: self.strict,
                    distances: &distances,
                };
                self.collect_offers(&requirement, &ctx)?
            };
            tracing::debug!(
                requirement = %requirement.id,
                offers = offers.len(),
                "collected offers"
            );

            let mut bound = None;
            for offer in offers {
                let provisioner_id = offer.provisioner_id.clone();
                let operation = offer.operation;
                let mut staged: Vec<Event> = Vec::new();
                let (accepted, node_id, reason) = match offer.accept(graph, &mut staged) {
                    Ok(Some(node)) => (true, Some(node), None),
                    Ok(None) => (false, None, Some("offer produced nothing".to_string())),
                    Err(err) => (false, None, Some(err.to_string())),
                };
                if accepted {
                    for event in staged {
                        sink.record(event);
                    }
                } else {
                    Self::discard_partial(graph, &staged)?;
                }
                receipt.builds.push(BuildReceipt {
                    requirement_id: requirement.id,
                    provisioner_id,
                    operation,
                    accepted,
                    node_id,
                    reason,
                });
                if let Some(node) = node_id {
                    bound = Some((node, operation));
                    break;
                }
            }

            match bound {
                Some((node, operation)) => {
                    graph.bind_requirement(edge_id, node, sink)?;
                    if operation.creates() {
                        receipt.created.push(node);
                    } else {
                        receipt.attached.push(node);
                    }
                    tracing::debug!(requirement = %requirement.id, node = %node, ?operation, "requirement bound");
                }
                None if requirement.hard => {
                    graph.mark_unresolvable(edge_id, sink)?;
                    receipt.unresolved(requirement.id);
                    tracing::warn!(requirement = %requirement.id, "hard requirement unresolvable");
                }
                None => {
                    receipt.waived_soft_requirements.push(requirement.id);
                    tracing::debug!(requirement = %requirement.id, "soft requirement waived");
                }
            }
        }

        tracing::info!(
            cursor = %cursor,
            attached = receipt.attached.len(),
            created = receipt.created.len(),
            unresolved = receipt.unresolved_hard_requirements.len(),
            waived = receipt.waived_soft_requirements.len(),
            "planning complete"
        );
        Ok(receipt)
    }

    /// Offers in the order they should be tried.
    fn collect_offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
        let mut ranked = Vec::new();
        for (index, provisioner) in self.provisioners.iter().enumerate() {
            for offer in provisioner.offers(requirement, ctx)? {
                if requirement.policy.allows(offer.operation) {
                    ranked.push((index, offer));
                }
            }
        }
        ranked.sort_by(|(a_index, a), (b_index, b)| {
            a.cost
                .cmp(&b.cost)
                .then(b.affordance.cmp(&a.affordance))
                .then(a.operation.base_weight().cmp(&b.operation.base_weight()))
                .then(a_index.cmp(b_index))
        });
        Ok(ranked.into_iter().map(|(_, offer)| offer).collect())
    }

    /// Undo whatever a failed offer managed to change before it gave up.
    fn discard_partial(graph: &mut Graph, staged: &[Event]) -> Result<()> {
        for event in staged.iter().rev() {
            graph.apply_event(&event.inverse())?;
        }
        if !staged.is_empty() {
            tracing::debug!(events = staged.len(), "discarded partial offer");
        }
        Ok(())
    }
}

/// The built-in provisioners in their default order.
pub fn default_provisioners() -> Vec<Box<dyn Provisioner>> {
    vec![
        Box::new(AffordanceProvisioner),
        Box::new(GraphProvisioner),
        Box::new(TokenProvisioner),
        Box::new(TemplateProvisioner),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use story_graph::{
        Criteria, Discard, Edge, EventKind, ProvisioningPolicy, Subgraph, Watcher, KIND_TOKEN,
    };

    struct Scene {
        graph: Graph,
        scene: EntityId,
        cursor: EntityId,
    }

    fn scene() -> Scene {
        let mut graph = Graph::new("provision");
        let scene = graph
            .add_subgraph(Subgraph::new("scene").with_label("village"), &mut Discard)
            .unwrap();
        let cursor = graph
            .add_node(Node::new("block").with_label("square").with_parent(scene), &mut Discard)
            .unwrap();
        Scene { graph, scene, cursor }
    }

    fn require(scene: &mut Scene, requirement: Requirement) -> EntityId {
        scene
            .graph
            .add_edge(Edge::dependency(scene.cursor, requirement), &mut Discard)
            .unwrap()
    }

    fn plan(scene: &mut Scene, provisioners: &[Box<dyn Provisioner>], templates: &TemplateRegistry) -> PlanningReceipt {
        Planner::new(provisioners, templates)
            .plan(&mut scene.graph, scene.cursor, &mut Discard)
            .unwrap()
    }

    struct Failing;

    impl Provisioner for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn layer(&self) -> ProvisionLayer {
            ProvisionLayer::Local
        }

        fn offers(&self, _requirement: &Requirement, _ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
            Ok(vec![Offer::new(
                Operation::Existing,
                Cost::new(Operation::Existing, 0, ProvisionLayer::Local),
                "failing",
                |_graph, _sink| Err(crate::Error::handler("provision", "broken offer")),
            )])
        }
    }

    /// Offers a fresh node under the scene, then fails before returning it.
    struct HalfBuilt;

    impl Provisioner for HalfBuilt {
        fn id(&self) -> &str {
            "half_built"
        }

        fn layer(&self) -> ProvisionLayer {
            ProvisionLayer::Local
        }

        fn offers(&self, _requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
            let scene = ctx.scene;
            Ok(vec![Offer::new(
                Operation::Create,
                Cost::new(Operation::Existing, 0, ProvisionLayer::Local),
                "half_built",
                move |graph, sink| {
                    let mut node = Node::new("npc").with_label("stray");
                    if let Some(scene) = scene {
                        node = node.with_parent(scene);
                    }
                    graph.add_node(node, sink)?;
                    Err(crate::Error::handler("provision", "ran out of clay"))
                },
            )])
        }
    }

    /// Makes one offer of the given operation at a fixed cost.
    struct Fixed {
        id: &'static str,
        operation: Operation,
        node: EntityId,
    }

    impl Provisioner for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn offers(&self, _requirement: &Requirement, _ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
            let node = self.node;
            let cost = Cost {
                weight: 1,
                proximity: 0,
                layer_penalty: 0,
            };
            Ok(vec![Offer::new(self.operation, cost, self.id, move |_graph, _sink| Ok(Some(node)))])
        }
    }

    #[test]
    fn test_existing_beats_create() {
        let mut scene = scene();
        let smith = scene
            .graph
            .add_node(Node::new("npc").with_label("smith"), &mut Discard)
            .unwrap();
        let edge = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Any).with_identifier("smith"),
        );

        let receipt = plan(&mut scene, &default_provisioners(), &TemplateRegistry::new());
        assert_eq!(receipt.attached, vec![smith]);
        assert!(receipt.created.is_empty());
        assert_eq!(scene.graph.edge(edge).unwrap().destination, Some(smith));
        let requirement = scene.graph.edge(edge).unwrap().requirement.clone().unwrap();
        assert_eq!(requirement.provider, Some(smith));
    }

    #[test]
    fn test_template_creation() {
        let mut scene = scene();
        let templates = TemplateRegistry::new()
            .with(Template::new("guard", "npc").with_tag("armed").scoped("village.*"));
        let edge = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Create).with_template("guard"),
        );

        let receipt = plan(&mut scene, &default_provisioners(), &templates);
        assert_eq!(receipt.created.len(), 1);
        let guard = scene.graph.node(receipt.created[0]).unwrap();
        assert!(guard.entity.has_tag("armed"));
        assert_eq!(guard.parent, Some(scene.scene));
        assert!(scene.graph.subgraph(scene.scene).unwrap().contains(guard.id()));
        assert_eq!(scene.graph.edge(edge).unwrap().destination, Some(guard.id()));
    }

    #[test]
    fn test_unresolved_hard_requirement_is_idempotent() {
        let mut scene = scene();
        let edge = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Existing).with_identifier("dragon"),
        );
        let requirement_id = scene.graph.edge(edge).unwrap().requirement.as_ref().unwrap().id;
        let provisioners = default_provisioners();
        let templates = TemplateRegistry::new();

        let first = plan(&mut scene, &provisioners, &templates);
        assert_eq!(first.unresolved_hard_requirements, vec![requirement_id]);
        let hash = scene.graph.state_hash().unwrap();

        let second = plan(&mut scene, &provisioners, &templates);
        assert_eq!(second.unresolved_hard_requirements, vec![requirement_id]);
        assert!(second.builds.is_empty());
        assert_eq!(scene.graph.state_hash().unwrap(), hash);
    }

    #[test]
    fn test_soft_requirement_is_waived_and_reoffered() {
        let mut scene = scene();
        let edge = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Existing)
                .with_identifier("bard")
                .soft(),
        );
        let provisioners = default_provisioners();
        let templates = TemplateRegistry::new();

        let receipt = plan(&mut scene, &provisioners, &templates);
        assert_eq!(receipt.waived_soft_requirements.len(), 1);
        assert!(!scene.graph.edge(edge).unwrap().requirement.as_ref().unwrap().is_unresolvable);

        let bard = scene
            .graph
            .add_node(Node::new("npc").with_label("bard"), &mut Discard)
            .unwrap();
        let receipt = plan(&mut scene, &provisioners, &templates);
        assert_eq!(receipt.attached, vec![bard]);
    }

    #[test]
    fn test_failing_offer_is_skipped() {
        let mut scene = scene();
        let smith = scene
            .graph
            .add_node(Node::new("npc").with_label("smith"), &mut Discard)
            .unwrap();
        require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Existing).with_identifier("smith"),
        );
        let provisioners: Vec<Box<dyn Provisioner>> = vec![Box::new(Failing), Box::new(GraphProvisioner)];

        let receipt = plan(&mut scene, &provisioners, &TemplateRegistry::new());
        assert_eq!(receipt.attached, vec![smith]);
        assert_eq!(receipt.builds.len(), 2);
        assert!(!receipt.builds[0].accepted);
        assert_eq!(receipt.builds[0].provisioner_id, "failing");
        assert!(receipt.builds[0].reason.as_deref().unwrap_or("").contains("broken offer"));
        assert!(receipt.builds[1].accepted);
    }

    #[test]
    fn test_affordance_wins_ties() {
        let mut scene = scene();
        let lantern = scene
            .graph
            .add_node(
                Node::new("item")
                    .with_label("lantern")
                    .with_tag(TAG_AFFORDANCE)
                    .with_parent(scene.scene),
                &mut Discard,
            )
            .unwrap();
        require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Existing)
                .with_criteria(Criteria::new().with_tag(TAG_AFFORDANCE)),
        );

        let receipt = plan(&mut scene, &default_provisioners(), &TemplateRegistry::new());
        assert_eq!(receipt.attached, vec![lantern]);
        assert_eq!(receipt.builds[0].provisioner_id, "affordance");
    }

    #[test]
    fn test_token_creation() {
        let mut scene = scene();
        let king = scene
            .graph
            .add_node(Node::new("npc").with_label("king"), &mut Discard)
            .unwrap();
        require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::CreateToken).with_identifier("king"),
        );

        let receipt = plan(&mut scene, &default_provisioners(), &TemplateRegistry::new());
        assert_eq!(receipt.created.len(), 1);
        let token = scene.graph.node(receipt.created[0]).unwrap();
        assert_eq!(token.entity.kind, KIND_TOKEN);
        assert_eq!(token.entity.attribute(ATTR_TOKEN_OF), Some(&json!(king.to_string())));
    }

    #[test]
    fn test_create_from_criteria() {
        let mut scene = scene();
        require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Create)
                .with_criteria(Criteria::new().with_kind("item").with_tag("key")),
        );

        let receipt = plan(&mut scene, &default_provisioners(), &TemplateRegistry::new());
        let key = scene.graph.node(receipt.created[0]).unwrap();
        assert_eq!(key.entity.kind, "item");
        assert!(key.entity.has_tag("key"));
    }

    #[test]
    fn test_frontier_stops_at_open_edges() {
        let mut scene = scene();
        let hall = scene
            .graph
            .add_node(Node::new("block").with_label("hall"), &mut Discard)
            .unwrap();
        scene
            .graph
            .add_edge(Edge::choice(scene.cursor, hall), &mut Discard)
            .unwrap();
        let near = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Existing).with_identifier("x"),
        );
        let far = scene
            .graph
            .add_edge(
                Edge::dependency(hall, Requirement::new(ProvisioningPolicy::Existing).with_identifier("y")),
                &mut Discard,
            )
            .unwrap();

        assert_eq!(Planner::frontier(&scene.graph, scene.cursor), vec![near, far]);
    }

    #[test]
    fn test_ambiguous_template_aborts_planning() {
        let mut scene = scene();
        let templates = TemplateRegistry::new()
            .with(Template::new("guard", "npc").scoped("village.*"))
            .with(Template::new("guard", "npc").scoped("village.*"));
        require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Create).with_template("guard"),
        );
        let provisioners = default_provisioners();
        let mut watcher = Watcher::new();

        let result = Planner::new(&provisioners, &templates).plan(&mut scene.graph, scene.cursor, &mut watcher);
        assert!(matches!(result, Err(Error::AmbiguousTemplate { .. })));
        assert!(watcher.events().is_empty());
    }

    #[test]
    fn test_equal_cost_prefers_existing_over_create() {
        let mut scene = scene();
        let smith = scene
            .graph
            .add_node(Node::new("npc").with_label("smith"), &mut Discard)
            .unwrap();
        require(&mut scene, Requirement::new(ProvisioningPolicy::Any));
        let provisioners: Vec<Box<dyn Provisioner>> = vec![
            Box::new(Fixed {
                id: "maker",
                operation: Operation::Create,
                node: smith,
            }),
            Box::new(Fixed {
                id: "finder",
                operation: Operation::Existing,
                node: smith,
            }),
        ];

        let receipt = plan(&mut scene, &provisioners, &TemplateRegistry::new());
        assert_eq!(receipt.attached, vec![smith]);
        assert!(receipt.created.is_empty());
        assert_eq!(receipt.builds[0].provisioner_id, "finder");
        assert_eq!(receipt.builds[0].operation, Operation::Existing);
    }

    #[test]
    fn test_failed_offer_leaves_no_partial_changes() {
        let mut scene = scene();
        let smith = scene
            .graph
            .add_node(Node::new("npc").with_label("smith"), &mut Discard)
            .unwrap();
        let edge = require(
            &mut scene,
            Requirement::new(ProvisioningPolicy::Any).with_identifier("smith"),
        );
        let before = scene.graph.nodes().len();
        let provisioners: Vec<Box<dyn Provisioner>> = vec![Box::new(HalfBuilt), Box::new(GraphProvisioner)];
        let mut watcher = Watcher::new();

        let receipt = Planner::new(&provisioners, &TemplateRegistry::new())
            .plan(&mut scene.graph, scene.cursor, &mut watcher)
            .unwrap();
        assert_eq!(receipt.builds.len(), 2);
        assert!(!receipt.builds[0].accepted);
        assert!(receipt.builds[0].reason.as_deref().unwrap_or("").contains("ran out of clay"));
        assert_eq!(receipt.attached, vec![smith]);

        assert_eq!(scene.graph.nodes().len(), before);
        assert!(scene.graph.find_nodes(&Criteria::new().with_label("stray")).is_empty());
        assert_eq!(scene.graph.subgraph(scene.scene).unwrap().members, vec![scene.cursor]);
        assert!(watcher.events().iter().all(|event| event.kind != EventKind::Create));
        assert_eq!(scene.graph.edge(edge).unwrap().destination, Some(smith));
    }
}
