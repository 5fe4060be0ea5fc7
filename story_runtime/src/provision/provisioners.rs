//! Built-in provisioners.

use serde_json::Value;
use story_graph::{EntityId, Node, Operation, Requirement, KIND_NODE, KIND_TOKEN};

use super::{Cost, Offer, ProvisionCtx, ProvisionLayer, Provisioner};
use crate::Result;

/// Tag marking nodes the environment offers on its own.
pub const TAG_AFFORDANCE: &str = "affordance";

/// Attribute on a token pointing at the singleton it stands for.
pub const ATTR_TOKEN_OF: &str = "token_of";

/// Offers nodes already in the graph: bind them, copy them, or update them in place.
#[derive(Debug, Default)]
pub struct GraphProvisioner;

impl Provisioner for GraphProvisioner {
    fn id(&self) -> &str {
        "graph"
    }

    fn layer(&self) -> ProvisionLayer {
        ProvisionLayer::Story
    }

    fn offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
        let update_template = match &requirement.template {
            Some(name) if requirement.policy.allows(Operation::Update) => {
                ctx.templates.resolve(name, ctx.address, ctx.strict)?.cloned()
            }
            _ => None,
        };

        let mut offers = Vec::new();
        for node in ctx.candidates(requirement) {
            let id = node.id();
            let proximity = ctx.proximity(id);

            if requirement.policy.allows(Operation::Existing) {
                offers.push(Offer::new(
                    Operation::Existing,
                    Cost::new(Operation::Existing, proximity, self.layer()),
                    self.id(),
                    move |graph, _sink| Ok(graph.contains(id).then_some(id)),
                ));
            }

            if requirement.policy.allows(Operation::Clone) {
                let mut copy = node.clone();
                offers.push(Offer::new(
                    Operation::Clone,
                    Cost::new(Operation::Clone, proximity, self.layer()),
                    self.id(),
                    move |graph, sink| {
                        copy.entity.id = EntityId::new();
                        copy.parent = copy.parent.filter(|parent| graph.contains(*parent));
                        Ok(Some(graph.add_node(copy, sink)?))
                    },
                ));
            }

            if let Some(template) = &update_template {
                let template = template.clone();
                offers.push(Offer::new(
                    Operation::Update,
                    Cost::new(Operation::Update, proximity, self.layer()),
                    self.id(),
                    move |graph, sink| {
                        for (key, value) in &template.attributes {
                            graph.set_attribute(id, key, value.clone(), sink)?;
                        }
                        let mut tags = graph.require_node(id)?.entity.tags.clone();
                        if !template.tags.is_subset(&tags) {
                            tags.extend(template.tags.iter().cloned());
                            graph.set_field(id, "/entity/tags", serde_json::to_value(&tags)?, sink)?;
                        }
                        Ok(Some(id))
                    },
                ));
            }
        }
        Ok(offers)
    }
}

/// Creates new nodes, from a named template when the requirement carries one and
/// from the requirement's own criteria otherwise.
#[derive(Debug, Default)]
pub struct TemplateProvisioner;

impl Provisioner for TemplateProvisioner {
    fn id(&self) -> &str {
        "template"
    }

    fn layer(&self) -> ProvisionLayer {
        ProvisionLayer::Story
    }

    fn offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
        let parent = ctx.scene;

        if let Some(name) = &requirement.template {
            if !requirement.policy.allows(Operation::CreateTemplate) {
                return Ok(Vec::new());
            }
            let Some(template) = ctx.templates.resolve(name, ctx.address, ctx.strict)? else {
                return Ok(Vec::new());
            };
            let layer = template.scope.layer();
            let template = template.clone();
            return Ok(vec![Offer::new(
                Operation::CreateTemplate,
                Cost::new(Operation::CreateTemplate, 0, layer),
                self.id(),
                move |graph, sink| Ok(Some(graph.add_node(template.build(parent), sink)?)),
            )]);
        }

        if !requirement.policy.allows(Operation::Create)
            || (requirement.identifier.is_none() && requirement.criteria.is_empty())
        {
            return Ok(Vec::new());
        }
        let node = node_from_requirement(requirement, parent);
        Ok(vec![Offer::new(
            Operation::Create,
            Cost::new(Operation::Create, 0, self.layer()),
            self.id(),
            move |graph, sink| Ok(Some(graph.add_node(node, sink)?)),
        )])
    }
}

fn node_from_requirement(requirement: &Requirement, parent: Option<EntityId>) -> Node {
    let criteria = &requirement.criteria;
    let mut node = Node::new(criteria.kind.clone().unwrap_or_else(|| KIND_NODE.to_string()));
    node.entity.label = requirement.identifier.clone().or_else(|| criteria.label.clone());
    node.entity.tags = criteria.tags.clone();
    node.entity.attributes = criteria.attributes.clone();
    node.parent = parent;
    node
}

/// Mints lightweight tokens that stand in for a matching singleton.
#[derive(Debug, Default)]
pub struct TokenProvisioner;

impl Provisioner for TokenProvisioner {
    fn id(&self) -> &str {
        "token"
    }

    fn layer(&self) -> ProvisionLayer {
        ProvisionLayer::Global
    }

    fn offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
        if !requirement.policy.allows(Operation::CreateToken) {
            return Ok(Vec::new());
        }
        let parent = ctx.scene;
        Ok(ctx
            .candidates(requirement)
            .into_iter()
            .filter(|node| node.entity.kind != KIND_TOKEN)
            .map(|singleton| {
                let mut token = Node::new(KIND_TOKEN)
                    .with_attribute(ATTR_TOKEN_OF, Value::from(singleton.id().to_string()));
                token.entity.label = singleton.entity.label.clone();
                token.entity.tags = singleton.entity.tags.clone();
                token.parent = parent;
                Offer::new(
                    Operation::CreateToken,
                    Cost::new(Operation::CreateToken, ctx.proximity(singleton.id()), self.layer()),
                    self.id(),
                    move |graph, sink| Ok(Some(graph.add_node(token, sink)?)),
                )
            })
            .collect())
    }
}

/// Offers nodes tagged as affordances in the cursor's scene.
#[derive(Debug, Default)]
pub struct AffordanceProvisioner;

impl Provisioner for AffordanceProvisioner {
    fn id(&self) -> &str {
        "affordance"
    }

    fn layer(&self) -> ProvisionLayer {
        ProvisionLayer::Scene
    }

    fn offers(&self, requirement: &Requirement, ctx: &ProvisionCtx<'_>) -> Result<Vec<Offer>> {
        if !requirement.policy.allows(Operation::Existing) || ctx.scene.is_none() {
            return Ok(Vec::new());
        }
        Ok(ctx
            .candidates(requirement)
            .into_iter()
            .filter(|node| node.entity.has_tag(TAG_AFFORDANCE) && node.parent == ctx.scene)
            .map(|node| {
                let id = node.id();
                Offer::new(
                    Operation::Existing,
                    Cost::new(Operation::Existing, ctx.proximity(id), self.layer()),
                    self.id(),
                    move |graph, _sink| Ok(graph.contains(id).then_some(id)),
                )
                .as_affordance()
            })
            .collect())
    }
}
