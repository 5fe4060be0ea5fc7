//! Creation templates and address-scoped lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use story_graph::{EntityId, Node};

use super::ProvisionLayer;
use crate::{Error, Result};

/// Where a template is visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePattern {
    /// `*`
    Global,
    /// `chapter1.village.*` - everything under the prefix.
    Prefix(String),
    /// One exact address.
    Exact(String),
}

impl ScopePattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" || pattern.is_empty() {
            ScopePattern::Global
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            ScopePattern::Prefix(prefix.to_string())
        } else {
            ScopePattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, address: &str) -> bool {
        match self {
            ScopePattern::Global => true,
            ScopePattern::Prefix(prefix) => {
                address == prefix
                    || address
                        .strip_prefix(prefix.as_str())
                        .map(|rest| rest.starts_with('.'))
                        .unwrap_or(false)
            }
            ScopePattern::Exact(path) => address == path,
        }
    }

    /// Exact paths beat every pattern; among patterns the longer prefix wins.
    fn rank(&self) -> (u8, usize) {
        match self {
            ScopePattern::Global => (0, 0),
            ScopePattern::Prefix(prefix) => (1, prefix.len()),
            ScopePattern::Exact(path) => (2, path.len()),
        }
    }

    pub fn layer(&self) -> ProvisionLayer {
        match self {
            ScopePattern::Global => ProvisionLayer::Global,
            ScopePattern::Prefix(_) => ProvisionLayer::Scene,
            ScopePattern::Exact(_) => ProvisionLayer::Local,
        }
    }
}

impl std::fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopePattern::Global => write!(f, "*"),
            ScopePattern::Prefix(prefix) => write!(f, "{}.*", prefix),
            ScopePattern::Exact(path) => write!(f, "{}", path),
        }
    }
}

/// Blueprint for a node created by provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub kind: String,
    pub label: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub content: Option<String>,
    pub scope: ScopePattern,
}

impl Template {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            label: None,
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            content: None,
            scope: ScopePattern::Global,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Restrict visibility, e.g. `"*"`, `"chapter1.*"` or `"chapter1.village.gate"`.
    pub fn scoped(mut self, pattern: &str) -> Self {
        self.scope = ScopePattern::parse(pattern);
        self
    }

    /// Materialize a fresh node.
    pub fn build(&self, parent: Option<EntityId>) -> Node {
        let mut node = Node::new(self.kind.clone());
        node.entity.label = self.label.clone().or_else(|| Some(self.name.clone()));
        node.entity.tags = self.tags.clone();
        node.entity.attributes = self.attributes.clone();
        node.content = self.content.clone();
        node.parent = parent;
        node
    }
}

/// Templates in registration order.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: Template) {
        tracing::debug!(name = %template.name, scope = %template.scope, "template registered");
        self.templates.push(template);
    }

    pub fn with(mut self, template: Template) -> Self {
        self.register(template);
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Find the most specific template named `name` visible at `address`.
    ///
    /// Under `strict`, two equally specific candidates are an error; otherwise the
    /// earliest registered wins.
    pub fn resolve(&self, name: &str, address: &str, strict: bool) -> Result<Option<&Template>> {
        let candidates: Vec<&Template> = self
            .templates
            .iter()
            .filter(|t| t.name == name && t.scope.matches(address))
            .collect();

        let Some(best) = candidates.iter().map(|t| t.scope.rank()).max() else {
            return Ok(None);
        };
        let winners: Vec<&Template> = candidates
            .into_iter()
            .filter(|t| t.scope.rank() == best)
            .collect();

        if strict && winners.len() > 1 {
            return Err(Error::AmbiguousTemplate {
                name: name.to_string(),
                address: address.to_string(),
                candidates: winners.iter().map(|t| t.scope.to_string()).collect(),
            });
        }
        Ok(winners.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard(scope: &str, flavor: &str) -> Template {
        Template::new("guard", "npc")
            .scoped(scope)
            .with_attribute("flavor", json!(flavor))
    }

    fn flavor(template: Option<&Template>) -> Option<&Value> {
        template.and_then(|t| t.attributes.get("flavor"))
    }

    #[test]
    fn test_scope_matching() {
        assert!(ScopePattern::parse("*").matches("anything.at.all"));
        assert!(ScopePattern::parse("chapter1.*").matches("chapter1.village"));
        assert!(!ScopePattern::parse("chapter1.*").matches("chapter10.village"));
        assert!(ScopePattern::parse("chapter1.village").matches("chapter1.village"));
        assert!(!ScopePattern::parse("chapter1.village").matches("chapter1.village.gate"));
    }

    #[test]
    fn test_exact_beats_longest_prefix() {
        let registry = TemplateRegistry::new()
            .with(guard("*", "global"))
            .with(guard("chapter1.*", "chapter"))
            .with(guard("chapter1.village.*", "village"))
            .with(guard("chapter1.village.gate", "gate"));

        let at_gate = registry.resolve("guard", "chapter1.village.gate", true).unwrap();
        assert_eq!(flavor(at_gate), Some(&json!("gate")));

        let at_well = registry.resolve("guard", "chapter1.village.well", true).unwrap();
        assert_eq!(flavor(at_well), Some(&json!("village")));

        let elsewhere = registry.resolve("guard", "chapter2.castle", true).unwrap();
        assert_eq!(flavor(elsewhere), Some(&json!("global")));

        assert!(registry.resolve("dragon", "chapter1", true).unwrap().is_none());
    }

    #[test]
    fn test_ties_are_ambiguous_when_strict() {
        let registry = TemplateRegistry::new()
            .with(guard("chapter1.*", "first"))
            .with(guard("chapter1.*", "second"));

        assert!(matches!(
            registry.resolve("guard", "chapter1.village", true),
            Err(Error::AmbiguousTemplate { .. })
        ));
        let lenient = registry.resolve("guard", "chapter1.village", false).unwrap();
        assert_eq!(flavor(lenient), Some(&json!("first")));
    }

    #[test]
    fn test_build_uses_name_as_default_label() {
        let parent = EntityId::new();
        let node = Template::new("lantern", "item").with_tag("light").build(Some(parent));
        assert_eq!(node.entity.label.as_deref(), Some("lantern"));
        assert!(node.entity.has_tag("light"));
        assert_eq!(node.parent, Some(parent));
    }
}
