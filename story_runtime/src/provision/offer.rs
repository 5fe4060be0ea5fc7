//! Offers and their costs.

use serde::{Deserialize, Serialize};
use story_graph::{EntityId, EventSink, Graph, Operation};

use crate::Result;

/// How far a provider sits from the requesting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionLayer {
    /// Registered for this exact address.
    Local,
    /// The cursor's own scene.
    Scene,
    /// The whole story graph.
    Story,
    /// Shared across stories.
    Global,
}

impl ProvisionLayer {
    pub fn penalty(&self) -> u32 {
        match self {
            ProvisionLayer::Local => 0,
            ProvisionLayer::Scene => 1,
            ProvisionLayer::Story => 2,
            ProvisionLayer::Global => 3,
        }
    }
}

/// Total order over offers. Compared field by field: weight, proximity, layer penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cost {
    pub weight: u32,
    pub proximity: u32,
    pub layer_penalty: u32,
}

impl Cost {
    pub fn new(operation: Operation, proximity: u32, layer: ProvisionLayer) -> Self {
        Self {
            weight: operation.base_weight(),
            proximity,
            layer_penalty: layer.penalty(),
        }
    }
}

pub type AcceptFn = Box<dyn FnOnce(&mut Graph, &mut dyn EventSink) -> Result<Option<EntityId>>>;

/// A provisioner's proposal for one requirement. Lives for a single planning pass.
pub struct Offer {
    pub operation: Operation,
    pub cost: Cost,
    /// Offered by the environment rather than requested.
    pub affordance: bool,
    pub provisioner_id: String,
    accept: AcceptFn,
}

impl Offer {
    pub fn new<F>(operation: Operation, cost: Cost, provisioner_id: impl Into<String>, accept: F) -> Self
    where
        F: FnOnce(&mut Graph, &mut dyn EventSink) -> Result<Option<EntityId>> + 'static,
    {
        Self {
            operation,
            cost,
            affordance: false,
            provisioner_id: provisioner_id.into(),
            accept: Box::new(accept),
        }
    }

    pub fn as_affordance(mut self) -> Self {
        self.affordance = true;
        self
    }

    /// Run the offer. `Ok(None)` means it produced nothing and the next offer is tried.
    pub fn accept(self, graph: &mut Graph, sink: &mut dyn EventSink) -> Result<Option<EntityId>> {
        (self.accept)(graph, sink)
    }
}

impl std::fmt::Debug for Offer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offer")
            .field("operation", &self.operation)
            .field("cost", &self.cost)
            .field("affordance", &self.affordance)
            .field("provisioner_id", &self.provisioner_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_order() {
        let near_existing = Cost::new(Operation::Existing, 1, ProvisionLayer::Story);
        let far_existing = Cost::new(Operation::Existing, 4, ProvisionLayer::Local);
        let create = Cost::new(Operation::Create, 0, ProvisionLayer::Local);

        assert!(near_existing < far_existing);
        assert!(far_existing < create);
        assert!(
            Cost::new(Operation::Existing, 1, ProvisionLayer::Scene)
                < Cost::new(Operation::Existing, 1, ProvisionLayer::Global)
        );
    }
}
