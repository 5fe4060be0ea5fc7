//! Story Graph - the registry of every item in one story instance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};

use crate::{
    Criteria, Edge, EntityId, Event, EventKind, EventSink, GraphError, GraphResult, Item, Node,
    Subgraph,
};

/// The main graph structure.
///
/// Items are stored by id in an ordered map; each item also carries the insertion
/// sequence the graph assigned to it, which drives every ordered query. An item may
/// only link to items already present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    uid: EntityId,
    label: String,
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    items: BTreeMap<EntityId, Item>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_uid(EntityId::new(), label)
    }

    /// Create an empty graph with a known uid (used when rebuilding from records).
    pub fn with_uid(uid: EntityId, label: impl Into<String>) -> Self {
        Self {
            uid,
            label: label.into(),
            next_seq: 0,
            items: BTreeMap::new(),
        }
    }

    pub fn uid(&self) -> EntityId {
        self.uid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.items.contains_key(&id)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn get(&self, id: EntityId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn node(&self, id: EntityId) -> Option<&Node> {
        self.get(id).and_then(Item::as_node)
    }

    pub fn edge(&self, id: EntityId) -> Option<&Edge> {
        self.get(id).and_then(Item::as_edge)
    }

    pub fn subgraph(&self, id: EntityId) -> Option<&Subgraph> {
        self.get(id).and_then(Item::as_subgraph)
    }

    pub fn require(&self, id: EntityId) -> GraphResult<&Item> {
        self.get(id).ok_or(GraphError::NotFound(id))
    }

    pub fn require_node(&self, id: EntityId) -> GraphResult<&Node> {
        match self.require(id)? {
            Item::Node(node) => Ok(node),
            _ => Err(GraphError::WrongItemType { id, expected: "node" }),
        }
    }

    pub fn require_edge(&self, id: EntityId) -> GraphResult<&Edge> {
        match self.require(id)? {
            Item::Edge(edge) => Ok(edge),
            _ => Err(GraphError::WrongItemType { id, expected: "edge" }),
        }
    }

    /// All items in insertion order.
    pub fn items(&self) -> Vec<&Item> {
        let mut items: Vec<_> = self.items.values().collect();
        items.sort_by_key(|item| item.entity().seq);
        items
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> Vec<&Node> {
        self.items().into_iter().filter_map(Item::as_node).collect()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> Vec<&Edge> {
        self.items().into_iter().filter_map(Item::as_edge).collect()
    }

    /// Find items matching a predicate, in insertion order.
    pub fn filter<F>(&self, predicate: F) -> Vec<&Item>
    where
        F: Fn(&Item) -> bool,
    {
        self.items().into_iter().filter(|item| predicate(item)).collect()
    }

    /// The earliest inserted item with the given label.
    pub fn find_by_label(&self, label: &str) -> Option<&Item> {
        self.items()
            .into_iter()
            .find(|item| item.entity().label.as_deref() == Some(label))
    }

    /// Nodes satisfying the criteria, in insertion order.
    pub fn find_nodes(&self, criteria: &Criteria) -> Vec<&Node> {
        self.nodes()
            .into_iter()
            .filter(|node| criteria.matches(&node.entity))
            .collect()
    }

    /// Outgoing edges of an item, in insertion order.
    pub fn edges_from(&self, source: EntityId) -> Vec<&Edge> {
        self.edges()
            .into_iter()
            .filter(|edge| edge.source == source)
            .collect()
    }

    /// Incoming resolved edges of an item, in insertion order.
    pub fn edges_to(&self, destination: EntityId) -> Vec<&Edge> {
        self.edges()
            .into_iter()
            .filter(|edge| edge.destination == Some(destination))
            .collect()
    }

    /// Members of a subgraph, in membership order.
    pub fn members(&self, subgraph: EntityId) -> Vec<&Item> {
        self.subgraph(subgraph)
            .map(|sg| sg.members.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Dotted address of an item through its containers, e.g. `chapter1.village.gate`.
    pub fn path(&self, id: EntityId) -> String {
        let mut segments = Vec::new();
        let mut current = self.get(id);
        while let Some(item) = current {
            segments.push(item.entity().display_name());
            current = item.parent().and_then(|parent| self.get(parent));
        }
        segments.reverse();
        segments.join(".")
    }

    /// Hop distance from `start` to every reachable item.
    ///
    /// Resolved edges and containment both count as one hop, in either direction.
    pub fn distances_from(&self, start: EntityId) -> BTreeMap<EntityId, u32> {
        let mut adjacency: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for item in self.items.values() {
            let mut link = |a: EntityId, b: EntityId| {
                adjacency.entry(a).or_default().push(b);
                adjacency.entry(b).or_default().push(a);
            };
            match item {
                Item::Edge(edge) => {
                    if let Some(destination) = edge.destination {
                        link(edge.source, destination);
                    }
                }
                other => {
                    if let Some(parent) = other.parent() {
                        link(other.id(), parent);
                    }
                }
            }
        }

        let mut distances = BTreeMap::new();
        if !self.contains(start) {
            return distances;
        }
        distances.insert(start, 0);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let next = distances[&current] + 1;
            for neighbor in adjacency.get(&current).into_iter().flatten() {
                if !distances.contains_key(neighbor) {
                    distances.insert(*neighbor, next);
                    queue.push_back(*neighbor);
                }
            }
        }
        distances
    }

    /// SHA-256 over the canonical JSON encoding of all items, hex encoded.
    pub fn state_hash(&self) -> GraphResult<String> {
        content_hash(&self.items)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add an item. Its links must already be present.
    ///
    /// Nodes and subgraphs with a parent are appended to the parent's members.
    pub fn add(&mut self, item: impl Into<Item>, sink: &mut dyn EventSink) -> GraphResult<EntityId> {
        let mut item = item.into();
        item.entity_mut().seq = self.next_seq;
        let id = self.insert_checked(item.clone())?;
        sink.record(Event::create(id, to_json(id, &item)?));

        if let Some(parent) = item.parent() {
            self.append_member(parent, id, sink)?;
        }
        tracing::debug!(graph = %self.uid, item = %id, item_type = item.type_name(), "item added");
        Ok(id)
    }

    pub fn add_node(&mut self, node: Node, sink: &mut dyn EventSink) -> GraphResult<EntityId> {
        self.add(node, sink)
    }

    pub fn add_edge(&mut self, edge: Edge, sink: &mut dyn EventSink) -> GraphResult<EntityId> {
        self.add(edge, sink)
    }

    pub fn add_subgraph(
        &mut self,
        subgraph: Subgraph,
        sink: &mut dyn EventSink,
    ) -> GraphResult<EntityId> {
        self.add(subgraph, sink)
    }

    /// Move an existing node or subgraph into a container.
    pub fn add_member(
        &mut self,
        subgraph: EntityId,
        member: EntityId,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        if self.subgraph(subgraph).is_none() {
            return Err(GraphError::WrongItemType {
                id: subgraph,
                expected: "subgraph",
            });
        }
        if let Item::Edge(_) = self.require(member)? {
            return Err(GraphError::WrongItemType {
                id: member,
                expected: "node or subgraph",
            });
        }
        if let Some(previous) = self.require(member)?.parent() {
            if previous == subgraph {
                return Ok(());
            }
            self.detach_member(previous, member, sink)?;
        }
        self.set_field(member, "/parent", Value::from(subgraph.to_string()), sink)?;
        self.append_member(subgraph, member, sink)
    }

    /// Remove an item. Fails if anything other than its container still links to it.
    pub fn remove(&mut self, id: EntityId, sink: &mut dyn EventSink) -> GraphResult<Item> {
        let parent = self.require(id)?.parent();
        self.ensure_unreferenced(id, parent)?;
        if let Some(parent) = parent {
            self.detach_member(parent, id, sink)?;
        }
        let removed = self.remove_checked(id)?;
        sink.record(Event::delete(id, to_json(id, &removed)?));
        tracing::debug!(graph = %self.uid, item = %id, "item removed");
        Ok(removed)
    }

    /// Write a field addressed by a JSON pointer into the item's serialized form.
    pub fn set_field(
        &mut self,
        id: EntityId,
        field: &str,
        value: Value,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        let old = self.write_field(id, field, Some(value.clone()), false)?;
        if old.as_ref() != Some(&value) {
            sink.record(Event::update(id, field, old, Some(value)));
        }
        Ok(())
    }

    /// Remove a field (map entry or array element) addressed by a JSON pointer.
    pub fn clear_field(&mut self, id: EntityId, field: &str, sink: &mut dyn EventSink) -> GraphResult<()> {
        let old = self.write_field(id, field, None, false)?;
        if old.is_some() {
            sink.record(Event::update(id, field, old, None));
        }
        Ok(())
    }

    pub fn set_label(
        &mut self,
        id: EntityId,
        label: impl Into<String>,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        self.set_field(id, "/entity/label", Value::from(label.into()), sink)
    }

    pub fn set_attribute(
        &mut self,
        id: EntityId,
        key: &str,
        value: Value,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        let field = format!("/entity/attributes/{}", escape_pointer(key));
        self.set_field(id, &field, value, sink)
    }

    /// Bind a dynamic edge's requirement to a provider and resolve the edge.
    pub fn bind_requirement(
        &mut self,
        edge: EntityId,
        provider: EntityId,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        self.require_requirement(edge)?;
        self.require(provider)?;
        let provider = Value::from(provider.to_string());
        self.set_field(edge, "/requirement/provider", provider.clone(), sink)?;
        self.set_field(edge, "/destination", provider, sink)
    }

    /// Mark a requirement as unresolvable. The flag is sticky.
    pub fn mark_unresolvable(&mut self, edge: EntityId, sink: &mut dyn EventSink) -> GraphResult<()> {
        self.require_requirement(edge)?;
        self.set_field(edge, "/requirement/is_unresolvable", Value::Bool(true), sink)
    }

    /// Clear the sticky unresolvable flag so the next planning pass offers again.
    pub fn reopen_requirement(&mut self, edge: EntityId, sink: &mut dyn EventSink) -> GraphResult<()> {
        self.require_requirement(edge)?;
        self.set_field(edge, "/requirement/is_unresolvable", Value::Bool(false), sink)
    }

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------

    /// Apply a recorded graph event.
    pub fn apply_event(&mut self, event: &Event) -> GraphResult<()> {
        let malformed = |reason: &str| GraphError::MalformedEvent {
            target: event.target,
            reason: reason.to_string(),
        };
        match event.kind {
            EventKind::Create => {
                let value = event.new.clone().ok_or_else(|| malformed("create without value"))?;
                let item: Item = serde_json::from_value(value)
                    .map_err(|err| malformed(&err.to_string()))?;
                if item.id() != event.target {
                    return Err(malformed("item id does not match target"));
                }
                self.insert_checked(item)?;
            }
            EventKind::Delete => {
                self.remove_checked(event.target)?;
            }
            EventKind::Update => {
                let field = event.field.as_deref().ok_or_else(|| malformed("update without field"))?;
                // An absent old value on an array element means the element was inserted.
                let insert = event.old.is_none();
                self.write_field(event.target, field, event.new.clone(), insert)?;
            }
            EventKind::Push | EventKind::Pop => {
                return Err(malformed("call stack event applied to a graph"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_requirement(&self, edge: EntityId) -> GraphResult<()> {
        match self.require_edge(edge)?.requirement {
            Some(_) => Ok(()),
            None => Err(GraphError::NoRequirement(edge)),
        }
    }

    fn check_links(&self, item: &Item) -> GraphResult<()> {
        for link in item.links() {
            if link != item.id() && !self.contains(link) {
                return Err(GraphError::DanglingLink {
                    from: item.id(),
                    to: link,
                });
            }
        }
        Ok(())
    }

    fn insert_checked(&mut self, item: Item) -> GraphResult<EntityId> {
        let id = item.id();
        if self.contains(id) {
            return Err(GraphError::DuplicateId(id));
        }
        self.check_links(&item)?;
        self.next_seq = self.next_seq.max(item.entity().seq + 1);
        self.items.insert(id, item);
        Ok(id)
    }

    fn remove_checked(&mut self, id: EntityId) -> GraphResult<Item> {
        self.require(id)?;
        self.ensure_unreferenced(id, None)?;
        self.items.remove(&id).ok_or(GraphError::NotFound(id))
    }

    /// Fails if any item other than `container` links to `id`.
    fn ensure_unreferenced(&self, id: EntityId, container: Option<EntityId>) -> GraphResult<()> {
        match self.items.values().find(|other| {
            other.id() != id && Some(other.id()) != container && other.links().contains(&id)
        }) {
            Some(by) => Err(GraphError::StillReferenced { id, by: by.id() }),
            None => Ok(()),
        }
    }

    fn append_member(
        &mut self,
        subgraph: EntityId,
        member: EntityId,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        let index = match self.get(subgraph) {
            Some(Item::Subgraph(sg)) if sg.contains(member) => return Ok(()),
            Some(Item::Subgraph(sg)) => sg.members.len(),
            // Parent is a plain node: ownership without a member list.
            Some(_) => return Ok(()),
            None => return Err(GraphError::NotFound(subgraph)),
        };
        self.set_field(
            subgraph,
            &format!("/members/{index}"),
            Value::from(member.to_string()),
            sink,
        )
    }

    fn detach_member(
        &mut self,
        subgraph: EntityId,
        member: EntityId,
        sink: &mut dyn EventSink,
    ) -> GraphResult<()> {
        let index = self
            .subgraph(subgraph)
            .and_then(|sg| sg.members.iter().position(|m| *m == member));
        match index {
            Some(index) => self.clear_field(subgraph, &format!("/members/{index}"), sink),
            None => Ok(()),
        }
    }

    /// Write (or clear) a pointer and return the previous value.
    fn write_field(
        &mut self,
        id: EntityId,
        field: &str,
        value: Option<Value>,
        insert: bool,
    ) -> GraphResult<Option<Value>> {
        let invalid = |reason: String| GraphError::InvalidField {
            id,
            field: field.to_string(),
            reason,
        };
        let item = self.require(id)?;
        let type_name = item.type_name();
        let mut doc = to_json(id, item)?;
        let old = write_pointer(&mut doc, field, value, insert).map_err(invalid)?;
        let mut updated: Item =
            serde_json::from_value(doc).map_err(|err| invalid(err.to_string()))?;
        if updated.id() != id || updated.type_name() != type_name {
            return Err(invalid("identity and item type cannot change".to_string()));
        }
        self.check_links(&updated)?;
        // Keep the assigned sequence even if the write touched the entity wholesale.
        let seq = self.items[&id].entity().seq;
        updated.entity_mut().seq = seq;
        self.items.insert(id, updated);
        Ok(old)
    }
}

/// Hex SHA-256 of a value's JSON encoding. Map keys must be ordered for the
/// result to be stable, so callers hash `BTreeMap`s and `Vec`s.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> GraphResult<String> {
    let bytes = serde_json::to_vec(value).map_err(|err| GraphError::Unhashable(err.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn to_json(id: EntityId, item: &Item) -> GraphResult<Value> {
    serde_json::to_value(item).map_err(|err| GraphError::InvalidField {
        id,
        field: String::new(),
        reason: err.to_string(),
    })
}

/// Escape a map key for use as a JSON pointer token.
pub fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Set or remove the value at a JSON pointer, creating the last segment if needed.
///
/// With `insert`, an array element is inserted at the index instead of replacing it.
fn write_pointer(
    doc: &mut Value,
    pointer: &str,
    value: Option<Value>,
    insert: bool,
) -> Result<Option<Value>, String> {
    let split = pointer
        .rfind('/')
        .ok_or_else(|| format!("not a JSON pointer: {pointer:?}"))?;
    let (parent_pointer, token) = (&pointer[..split], unescape_pointer(&pointer[split + 1..]));
    let parent = doc
        .pointer_mut(parent_pointer)
        .ok_or_else(|| format!("no container at {parent_pointer:?}"))?;

    match parent {
        Value::Object(map) => Ok(match value {
            Some(value) => map.insert(token, value),
            None => map.remove(&token),
        }),
        Value::Array(array) => {
            let index: usize = token
                .parse()
                .map_err(|_| format!("bad array index {token:?}"))?;
            match value {
                Some(value) if insert && index <= array.len() => {
                    array.insert(index, value);
                    Ok(None)
                }
                Some(value) if index == array.len() => {
                    array.push(value);
                    Ok(None)
                }
                Some(value) if index < array.len() => {
                    Ok(Some(std::mem::replace(&mut array[index], value)))
                }
                None if index < array.len() => Ok(Some(array.remove(index))),
                _ => Err(format!("array index {index} out of bounds")),
            }
        }
        Value::Null => match value {
            // Writing into an absent optional struct is not supported; clearing is a no-op.
            Some(_) => Err(format!("container at {parent_pointer:?} is null")),
            None => Ok(None),
        },
        _ => Err(format!("value at {parent_pointer:?} is not a container")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Discard, ProvisioningPolicy, Requirement, Watcher};
    use serde_json::json;

    fn village() -> (Graph, EntityId, EntityId, EntityId) {
        let mut graph = Graph::new("test story");
        let sink = &mut Discard;
        let scene = graph
            .add_subgraph(Subgraph::new("scene").with_label("village"), sink)
            .unwrap();
        let gate = graph
            .add_node(Node::new("block").with_label("gate").with_parent(scene), sink)
            .unwrap();
        let square = graph
            .add_node(Node::new("block").with_label("square").with_parent(scene), sink)
            .unwrap();
        graph.add_edge(Edge::choice(gate, square), sink).unwrap();
        (graph, scene, gate, square)
    }

    #[test]
    fn test_add_and_lookup() {
        let (graph, scene, gate, square) = village();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.find_by_label("gate").map(Item::id), Some(gate));
        assert_eq!(graph.edges_from(gate).len(), 1);
        assert_eq!(graph.edges_to(square).len(), 1);
        assert_eq!(graph.members(scene).len(), 2);
        assert_eq!(graph.path(square), "village.square");
    }

    #[test]
    fn test_rejects_dangling_links() {
        let mut graph = Graph::new("test");
        let node = graph.add_node(Node::new("block"), &mut Discard).unwrap();
        let missing = EntityId::new();

        let err = graph
            .add_edge(Edge::choice(node, missing), &mut Discard)
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingLink { to, .. } if to == missing));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut graph = Graph::new("test");
        let node = Node::new("block");
        graph.add_node(node.clone(), &mut Discard).unwrap();
        assert_eq!(
            graph.add_node(node.clone(), &mut Discard),
            Err(GraphError::DuplicateId(node.id()))
        );
    }

    #[test]
    fn test_remove_refuses_referenced_items() {
        let (mut graph, scene, gate, square) = village();
        let hash = graph.state_hash().unwrap();
        let mut watcher = Watcher::new();
        assert!(matches!(
            graph.remove(square, &mut watcher),
            Err(GraphError::StillReferenced { id, .. }) if id == square
        ));
        assert!(graph.members(scene).iter().any(|item| item.id() == square));
        assert_eq!(graph.state_hash().unwrap(), hash);
        assert!(watcher.events().is_empty());

        let edge = graph.edges_from(gate)[0].id();
        graph.remove(edge, &mut Discard).unwrap();
        graph.remove(square, &mut Discard).unwrap();
        assert!(!graph.contains(square));
    }

    #[test]
    fn test_content_hash_rejects_unencodable_state() {
        let keyed_by_pairs = BTreeMap::from([((1, 2), "pair")]);
        assert!(matches!(content_hash(&keyed_by_pairs), Err(GraphError::Unhashable(_))));
        assert_eq!(content_hash(&json!({"a": 1})).unwrap().len(), 64);
    }

    #[test]
    fn test_find_nodes_in_insertion_order() {
        let (graph, _, gate, square) = village();
        let found: Vec<_> = graph
            .find_nodes(&Criteria::new().with_kind("block"))
            .into_iter()
            .map(Node::id)
            .collect();
        assert_eq!(found, vec![gate, square]);
    }

    #[test]
    fn test_distances() {
        let (mut graph, scene, gate, _square) = village();
        let far = graph.add_node(Node::new("block"), &mut Discard).unwrap();

        let distances = graph.distances_from(gate);
        assert_eq!(distances[&gate], 0);
        assert_eq!(distances[&scene], 1);
        assert!(!distances.contains_key(&far));
    }

    #[test]
    fn test_set_field_records_old_and_new() {
        let (mut graph, _, gate, _) = village();
        let mut watcher = Watcher::new();

        graph.set_attribute(gate, "visits", json!(1), &mut watcher).unwrap();
        graph.set_attribute(gate, "visits", json!(1), &mut watcher).unwrap();

        assert_eq!(watcher.events().len(), 1);
        let event = &watcher.events()[0];
        assert_eq!(event.field.as_deref(), Some("/entity/attributes/visits"));
        assert_eq!(event.old, None);
        assert_eq!(event.new, Some(json!(1)));
        assert_eq!(graph.node(gate).unwrap().entity.attribute("visits"), Some(&json!(1)));
    }

    #[test]
    fn test_set_field_validates_links() {
        let (mut graph, _, gate, _) = village();
        let edge = graph.edges_from(gate)[0].id();
        let err = graph
            .set_field(edge, "/destination", json!(EntityId::new().to_string()), &mut Discard)
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingLink { .. }));
    }

    #[test]
    fn test_replaying_events_reproduces_state() {
        let mut source = Graph::new("source");
        let mut replica = Graph::with_uid(source.uid(), "replica");
        let mut watcher = Watcher::new();

        let scene = source
            .add_subgraph(Subgraph::new("scene").with_label("inn"), &mut watcher)
            .unwrap();
        let hall = source
            .add_node(Node::new("block").with_parent(scene), &mut watcher)
            .unwrap();
        let edge = source
            .add_edge(
                Edge::dependency(hall, Requirement::new(ProvisioningPolicy::Any).with_identifier("x")),
                &mut watcher,
            )
            .unwrap();
        let target = source.add_node(Node::new("npc"), &mut watcher).unwrap();
        source.bind_requirement(edge, target, &mut watcher).unwrap();
        source.set_label(hall, "hall", &mut watcher).unwrap();

        for event in watcher.events() {
            replica.apply_event(event).unwrap();
        }
        assert_eq!(replica.state_hash().unwrap(), source.state_hash().unwrap());
    }

    #[test]
    fn test_rollback_restores_hash() {
        let (mut graph, scene, gate, _) = village();
        let before = graph.state_hash().unwrap();
        let mut watcher = Watcher::new();

        let extra = graph
            .add_node(Node::new("block").with_parent(scene), &mut watcher)
            .unwrap();
        graph.add_edge(Edge::choice(gate, extra), &mut watcher).unwrap();
        graph.set_attribute(gate, "seen", json!(true), &mut watcher).unwrap();
        assert_ne!(graph.state_hash().unwrap(), before);

        for event in watcher.rollback_events() {
            graph.apply_event(&event).unwrap();
        }
        assert_eq!(graph.state_hash().unwrap(), before);
    }

    #[test]
    fn test_requirement_binding() {
        let (mut graph, _, gate, square) = village();
        let edge = graph
            .add_edge(
                Edge::dependency(gate, Requirement::new(ProvisioningPolicy::Existing).with_identifier("square")),
                &mut Discard,
            )
            .unwrap();
        assert!(graph.edge(edge).unwrap().is_open());

        graph.bind_requirement(edge, square, &mut Discard).unwrap();
        let bound = graph.edge(edge).unwrap();
        assert_eq!(bound.destination, Some(square));
        assert_eq!(bound.requirement.as_ref().unwrap().provider, Some(square));

        let plain = graph.edges_from(gate)[0].id();
        assert_eq!(
            graph.mark_unresolvable(plain, &mut Discard),
            Err(GraphError::NoRequirement(plain))
        );
    }

    #[test]
    fn test_add_member_moves_between_containers() {
        let (mut graph, village_scene, gate, _) = village();
        let forest = graph
            .add_subgraph(Subgraph::new("scene").with_label("forest"), &mut Discard)
            .unwrap();

        graph.add_member(forest, gate, &mut Discard).unwrap();
        assert_eq!(graph.node(gate).unwrap().parent, Some(forest));
        assert!(graph.subgraph(forest).unwrap().contains(gate));
        assert!(!graph.subgraph(village_scene).unwrap().contains(gate));
        assert_eq!(graph.path(gate), "forest.gate");
    }

    #[test]
    fn test_serde_round_trip_keeps_hash() {
        let (graph, ..) = village();
        let json = serde_json::to_string(&graph).unwrap();
        let restored: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.uid(), graph.uid());
        assert_eq!(restored.state_hash().unwrap(), graph.state_hash().unwrap());
    }
}
