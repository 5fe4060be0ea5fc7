//! Requirements: what must fill a dynamic edge, and how it may be provisioned.

use serde::{Deserialize, Serialize};

use crate::{Criteria, EntityId, Node};

/// How a requirement may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningPolicy {
    /// Bind to something already in the graph.
    Existing,
    /// Materialize a new node.
    Create,
    /// Copy an existing node.
    Clone,
    /// Modify an existing node in place.
    Update,
    /// Any operation is acceptable.
    Any,
    /// Mint a lightweight token referencing a singleton.
    CreateToken,
}

/// The concrete operation an offer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Existing,
    Create,
    CreateTemplate,
    Clone,
    Update,
    CreateToken,
}

impl Operation {
    /// Default weight of an operation. Reuse is cheaper than construction.
    pub fn base_weight(&self) -> u32 {
        match self {
            Operation::Existing => 1,
            Operation::Update => 2,
            Operation::CreateToken => 3,
            Operation::Clone => 4,
            Operation::CreateTemplate => 5,
            Operation::Create => 6,
        }
    }

    /// Whether the operation produces a new entity.
    pub fn creates(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::CreateTemplate | Operation::Clone | Operation::CreateToken
        )
    }
}

impl ProvisioningPolicy {
    pub fn allows(&self, operation: Operation) -> bool {
        match self {
            ProvisioningPolicy::Any => true,
            ProvisioningPolicy::Existing => operation == Operation::Existing,
            ProvisioningPolicy::Create => {
                matches!(operation, Operation::Create | Operation::CreateTemplate)
            }
            ProvisioningPolicy::Clone => operation == Operation::Clone,
            ProvisioningPolicy::Update => operation == Operation::Update,
            ProvisioningPolicy::CreateToken => operation == Operation::CreateToken,
        }
    }
}

/// A declarative description of what must fill a dynamic edge.
///
/// Created together with its edge. Provisioning is the only thing that mutates it
/// (binding a provider, or marking it unresolvable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: EntityId,
    /// Exact label or id of the wanted entity.
    pub identifier: Option<String>,
    #[serde(default)]
    pub criteria: Criteria,
    /// Name of a creation template.
    pub template: Option<String>,
    pub policy: ProvisioningPolicy,
    pub hard: bool,
    /// Entity bound by provisioning.
    pub provider: Option<EntityId>,
    /// Sticky: set when a hard requirement found no provider.
    #[serde(default)]
    pub is_unresolvable: bool,
}

impl Requirement {
    /// Create a hard requirement with the given policy.
    pub fn new(policy: ProvisioningPolicy) -> Self {
        Self {
            id: EntityId::new(),
            identifier: None,
            criteria: Criteria::default(),
            template: None,
            policy,
            hard: true,
            provider: None,
            is_unresolvable: false,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn soft(mut self) -> Self {
        self.hard = false;
        self
    }

    pub fn satisfied(&self) -> bool {
        self.provider.is_some()
    }

    /// Open requirements are still eligible for offers.
    pub fn is_open(&self) -> bool {
        self.provider.is_none() && !self.is_unresolvable
    }

    /// Whether an existing node is a candidate for this requirement.
    ///
    /// A requirement with neither identifier nor criteria matches nothing, so lookups
    /// never bind arbitrary nodes.
    pub fn matches(&self, node: &Node) -> bool {
        if self.identifier.is_none() && self.criteria.is_empty() {
            return false;
        }
        if let Some(identifier) = &self.identifier {
            let by_label = node.entity.label.as_deref() == Some(identifier.as_str());
            let by_id = node.entity.id.to_string() == *identifier;
            if !by_label && !by_id {
                return false;
            }
        }
        self.criteria.matches(&node.entity)
    }
}
