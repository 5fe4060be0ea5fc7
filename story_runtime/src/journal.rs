//! Journal fragments - opaque output records emitted by the JOURNAL phase.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use story_graph::EntityId;

pub const FRAGMENT_CONTENT: &str = "content";
pub const FRAGMENT_CHOICE_MENU: &str = "choice_menu";

/// A unit of rendered output. The runtime guarantees order, never schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_type: String,
    pub content: Value,
    pub source_id: Option<EntityId>,
}

impl Fragment {
    pub fn new(fragment_type: impl Into<String>, content: Value, source_id: Option<EntityId>) -> Self {
        Self {
            fragment_type: fragment_type.into(),
            content,
            source_id,
        }
    }

    pub fn text(content: impl Into<String>, source_id: EntityId) -> Self {
        Self::new(FRAGMENT_CONTENT, Value::String(content.into()), Some(source_id))
    }

    /// Interpret a `render` handler result.
    ///
    /// Strings become content fragments, objects with a `fragment_type` are taken as
    /// fragments, arrays are flattened. Anything else becomes a content fragment holding
    /// the raw value.
    pub fn from_render(value: Value, source_id: EntityId) -> Vec<Fragment> {
        match value {
            Value::Null => Vec::new(),
            Value::String(text) => vec![Fragment::text(text, source_id)],
            Value::Array(values) => values
                .into_iter()
                .flat_map(|value| Fragment::from_render(value, source_id))
                .collect(),
            Value::Object(map) if map.contains_key("fragment_type") => {
                let value = Value::Object(map);
                match serde_json::from_value::<Fragment>(value.clone()) {
                    Ok(mut fragment) => {
                        fragment.source_id.get_or_insert(source_id);
                        vec![fragment]
                    }
                    Err(_) => vec![Fragment::new(FRAGMENT_CONTENT, value, Some(source_id))],
                }
            }
            other => vec![Fragment::new(FRAGMENT_CONTENT, other, Some(source_id))],
        }
    }
}
