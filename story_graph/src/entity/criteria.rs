//! Match criteria shared by behavior selection and requirement lookup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Entity;

/// A conjunction of simple tests against an [`Entity`].
///
/// Empty criteria match everything; see [`Criteria::is_empty`] for callers that
/// want to treat "no criteria" differently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub label: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.kind.is_none()
            && self.tags.is_empty()
            && self.attributes.is_empty()
    }

    /// Check whether an entity satisfies every test.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(label) = &self.label {
            if entity.label.as_deref() != Some(label.as_str()) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if &entity.kind != kind {
                return false;
            }
        }
        if !self.tags.is_subset(&entity.tags) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(key, value)| entity.attributes.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lantern() -> Entity {
        let mut entity = Entity::new("item");
        entity.label = Some("lantern".to_string());
        entity.tags.insert("light".to_string());
        entity.tags.insert("portable".to_string());
        entity.attributes.insert("lit".to_string(), json!(false));
        entity
    }

    #[test]
    fn test_empty_criteria_match_everything() {
        assert!(Criteria::new().is_empty());
        assert!(Criteria::new().matches(&lantern()));
    }

    #[test]
    fn test_all_tests_must_hold() {
        let entity = lantern();

        let criteria = Criteria::new()
            .with_kind("item")
            .with_tag("light")
            .with_attribute("lit", json!(false));
        assert!(criteria.matches(&entity));

        assert!(!criteria.clone().with_tag("heavy").matches(&entity));
        assert!(!Criteria::new().with_label("torch").matches(&entity));
        assert!(!Criteria::new().with_attribute("lit", json!(true)).matches(&entity));
    }
}
