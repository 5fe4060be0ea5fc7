//! Shared fixtures for unit tests.

use story_graph::{
    Criteria, Discard, Edge, EntityId, Graph, Node, ProvisioningPolicy, Requirement, Subgraph,
};

/// A two-block scene: the gate needs a lantern and offers one choice into the hall.
pub(crate) struct Story {
    pub graph: Graph,
    pub scene: EntityId,
    pub start: EntityId,
    pub hall: EntityId,
    pub to_hall: EntityId,
    pub lantern: EntityId,
}

pub(crate) fn story() -> Story {
    let mut graph = Graph::new("story");
    let scene = graph
        .add_subgraph(Subgraph::new("scene").with_label("village"), &mut Discard)
        .unwrap();
    let start = graph
        .add_node(
            Node::new("block")
                .with_label("gate")
                .with_content("You stand at the gate.")
                .with_parent(scene),
            &mut Discard,
        )
        .unwrap();
    let hall = graph
        .add_node(Node::new("block").with_label("hall").with_parent(scene), &mut Discard)
        .unwrap();
    let to_hall = graph
        .add_edge(Edge::choice(start, hall).with_label("Enter the hall"), &mut Discard)
        .unwrap();
    let lantern = graph
        .add_edge(
            Edge::dependency(
                start,
                Requirement::new(ProvisioningPolicy::Create)
                    .with_identifier("lantern")
                    .with_criteria(Criteria::new().with_kind("item")),
            ),
            &mut Discard,
        )
        .unwrap();

    Story {
        graph,
        scene,
        start,
        hall,
        to_hall,
        lantern,
    }
}
