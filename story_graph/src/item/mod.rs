//! Items stored in the graph: nodes, edges and subgraphs.

mod edge;
mod node;
mod subgraph;

pub use edge::*;
pub use node::*;
pub use subgraph::*;

use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId};

/// Everything a [`Graph`](crate::Graph) can hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum Item {
    Node(Node),
    Edge(Edge),
    Subgraph(Subgraph),
}

impl Item {
    pub fn entity(&self) -> &Entity {
        match self {
            Item::Node(node) => &node.entity,
            Item::Edge(edge) => &edge.entity,
            Item::Subgraph(subgraph) => &subgraph.entity,
        }
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        match self {
            Item::Node(node) => &mut node.entity,
            Item::Edge(edge) => &mut edge.entity,
            Item::Subgraph(subgraph) => &mut subgraph.entity,
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity().id
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Node(_) => "node",
            Item::Edge(_) => "edge",
            Item::Subgraph(_) => "subgraph",
        }
    }

    /// Every other item this one refers to. All of them must exist in the graph.
    pub fn links(&self) -> Vec<EntityId> {
        match self {
            Item::Node(node) => node.parent.into_iter().collect(),
            Item::Edge(edge) => {
                let mut links = vec![edge.source];
                links.extend(edge.destination);
                links.extend(edge.return_to);
                links
            }
            Item::Subgraph(subgraph) => {
                let mut links: Vec<_> = subgraph.parent.into_iter().collect();
                links.extend(subgraph.members.iter().copied());
                links
            }
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Item::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Item::Edge(edge) => Some(edge),
            _ => None,
        }
    }

    pub fn as_subgraph(&self) -> Option<&Subgraph> {
        match self {
            Item::Subgraph(subgraph) => Some(subgraph),
            _ => None,
        }
    }

    /// The container an item belongs to, if any.
    pub fn parent(&self) -> Option<EntityId> {
        match self {
            Item::Node(node) => node.parent,
            Item::Subgraph(subgraph) => subgraph.parent,
            Item::Edge(_) => None,
        }
    }
}

impl From<Node> for Item {
    fn from(node: Node) -> Self {
        Item::Node(node)
    }
}

impl From<Edge> for Item {
    fn from(edge: Edge) -> Self {
        Item::Edge(edge)
    }
}

impl From<Subgraph> for Item {
    fn from(subgraph: Subgraph) -> Self {
        Item::Subgraph(subgraph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProvisioningPolicy, Requirement};

    #[test]
    fn test_links_cover_every_reference() {
        let scene = Subgraph::new("scene");
        let a = Node::new("block").with_parent(scene.entity.id);
        let b = Node::new("block");

        let node_links = Item::from(a.clone()).links();
        assert_eq!(node_links, vec![scene.entity.id]);

        let edge = Edge::choice(a.entity.id, b.entity.id);
        assert_eq!(Item::from(edge).links(), vec![a.entity.id, b.entity.id]);

        let dynamic = Edge::dependency(a.entity.id, Requirement::new(ProvisioningPolicy::Any));
        assert_eq!(Item::from(dynamic).links(), vec![a.entity.id]);
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let node = Node::new("block").with_label("start");
        let value = serde_json::to_value(Item::from(node)).unwrap();
        assert_eq!(value["item_type"], "node");
        assert_eq!(value["entity"]["label"], "start");
    }
}
