//! Handler results and the strategies that combine them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use story_graph::EntityId;

/// What a single handler returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Value(Value),
    /// Follow this edge next. Honored in PREREQS and POSTREQS.
    Follow(EntityId),
}

impl Outcome {
    pub fn value(value: impl Into<Value>) -> Self {
        Outcome::Value(value.into())
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Follow(_) => None,
        }
    }

    pub fn as_follow(&self) -> Option<EntityId> {
        match self {
            Outcome::Follow(edge) => Some(*edge),
            Outcome::Value(_) => None,
        }
    }

    /// Truthiness for ALL aggregation. `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Outcome::Follow(_) => true,
            Outcome::Value(value) => truthy(value),
        }
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// How handler results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Every non-null result, in order.
    Gather,
    /// Objects merged with earlier keys winning; lists concatenated.
    Merge,
    /// Each handler sees the previous result; the last one wins.
    Pipeline,
    /// Stop at the first non-null result.
    First,
    /// True when every non-null result is truthy.
    All,
}

/// The combined result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Gathered(Vec<Outcome>),
    Merged(Value),
    Piped(Option<Value>),
    First(Option<Outcome>),
    All(bool),
}

impl Aggregate {
    /// Plain values carried by the result, in order. Follow outcomes are skipped.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Aggregate::Gathered(outcomes) => outcomes
                .iter()
                .filter_map(|o| o.as_value().cloned())
                .collect(),
            Aggregate::Merged(value) => vec![value.clone()],
            Aggregate::Piped(value) => value.iter().cloned().collect(),
            Aggregate::First(outcome) => outcome
                .as_ref()
                .and_then(|o| o.as_value().cloned())
                .into_iter()
                .collect(),
            Aggregate::All(flag) => vec![Value::Bool(*flag)],
        }
    }

    /// The first edge a handler asked to follow.
    pub fn redirect(&self) -> Option<EntityId> {
        match self {
            Aggregate::Gathered(outcomes) => outcomes.iter().find_map(Outcome::as_follow),
            Aggregate::First(Some(outcome)) => outcome.as_follow(),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            Aggregate::All(flag) => *flag,
            Aggregate::Gathered(outcomes) => outcomes.iter().all(Outcome::is_truthy),
            Aggregate::Merged(value) => truthy(value),
            Aggregate::Piped(value) => value.as_ref().map(truthy).unwrap_or(false),
            Aggregate::First(outcome) => outcome.as_ref().map(Outcome::is_truthy).unwrap_or(false),
        }
    }

    /// The result as a single JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Aggregate::Gathered(outcomes) => Value::Array(
                outcomes
                    .into_iter()
                    .filter_map(|o| match o {
                        Outcome::Value(value) => Some(value),
                        Outcome::Follow(_) => None,
                    })
                    .collect(),
            ),
            Aggregate::Merged(value) => value,
            Aggregate::Piped(value) => value.unwrap_or(Value::Null),
            Aggregate::First(outcome) => match outcome {
                Some(Outcome::Value(value)) => value,
                Some(Outcome::Follow(edge)) => Value::String(edge.to_string()),
                None => Value::Null,
            },
            Aggregate::All(flag) => Value::Bool(flag),
        }
    }
}

/// Combine results for MERGE.
///
/// All objects: union with the earliest key winning. All arrays: concatenation.
/// Anything else cannot be merged and is returned gathered.
pub(crate) fn merge(task: &str, outcomes: Vec<Outcome>) -> Aggregate {
    let values: Vec<&Value> = outcomes.iter().filter_map(Outcome::as_value).collect();
    if values.len() != outcomes.len() {
        tracing::warn!(task, "follow outcome in MERGE; gathering instead");
        return Aggregate::Gathered(outcomes);
    }
    if values.is_empty() {
        return Aggregate::Merged(Value::Object(Map::new()));
    }

    if values.iter().all(|v| v.is_object()) {
        let mut merged = Map::new();
        for value in values {
            if let Value::Object(map) = value {
                for (key, value) in map {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        return Aggregate::Merged(Value::Object(merged));
    }

    if values.iter().all(|v| v.is_array()) {
        let merged = values
            .into_iter()
            .filter_map(Value::as_array)
            .flat_map(|items| items.iter().cloned())
            .collect();
        return Aggregate::Merged(Value::Array(merged));
    }

    tracing::warn!(task, "mixed result types in MERGE; gathering instead");
    Aggregate::Gathered(outcomes)
}
