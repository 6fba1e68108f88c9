//! Schema intelligence: learn structural schemas from live JSON traffic,
//! detect contract drift, and generate mock payloads from what was learned.
//!
//! The learned schema is a tree. Every node carries a [`FieldMeta`] descriptor
//! (`types_seen`, `nullable`, `occurrences`, `last_example`); object nodes
//! carry named children and array nodes carry an `items` sub-node. A node may
//! accumulate both object and array evidence over its lifetime; the dominant
//! shape is resolved through a fixed type-preference order at read time.
//!
//! `null` is never a type: observing `null` sets `nullable` and leaves
//! `types_seen` untouched. A later non-null value is an INFO-level change,
//! not a breaking one.

mod compare;
mod generate;
mod registry;

pub use compare::{compare, drift_score, drift_summary, ChangeType, ContractChange, Severity};
pub use generate::generate_body;
pub use registry::SchemaIntelligence;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// JSON type names tracked per field.
///
/// Variant order doubles as the generation/classification preference order:
/// `object, array, string, integer, number, boolean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
}

impl JsonType {
    /// The JSON type of a value, or `None` for `null`.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) => {
                if n.is_f64() {
                    Some(Self::Number)
                } else {
                    Some(Self::Integer)
                }
            }
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }
}

impl std::fmt::Display for JsonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Per-field metadata accumulated across all observed payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Every non-null JSON type ever observed for this field.
    #[serde(default)]
    pub types_seen: BTreeSet<JsonType>,
    /// True if `null` was ever observed.
    #[serde(default)]
    pub nullable: bool,
    /// Number of times this field was observed.
    #[serde(default)]
    pub occurrences: u64,
    /// Last non-null sample value, kept for mock generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_example: Option<Value>,
}

impl FieldMeta {
    /// Record one observation of this field.
    pub fn observe(&mut self, value: &Value) {
        self.occurrences += 1;
        if let Some(ty) = JsonType::of(value) {
            self.types_seen.insert(ty);
            self.last_example = Some(value.clone());
        } else {
            self.nullable = true;
        }
    }

    /// The dominant observed type under the fixed preference order, or `None`
    /// if only null has ever been seen.
    pub fn primary_type(&self) -> Option<JsonType> {
        self.types_seen.iter().next().copied()
    }
}

/// One node of a learned schema tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Type metadata for this node.
    #[serde(default)]
    pub meta: FieldMeta,
    /// Object children, by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, SchemaNode>,
    /// Array item schema, merged across every observed element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
}

impl SchemaNode {
    /// Merge one observed payload into this node, recursing into every object
    /// child and every array element (not just the first).
    pub fn observe(&mut self, value: &Value) {
        self.meta.observe(value);
        match value {
            Value::Object(map) => {
                for (key, child_value) in map {
                    self.children.entry(key.clone()).or_default().observe(child_value);
                }
            }
            Value::Array(elements) => {
                if !elements.is_empty() {
                    let items = self.items.get_or_insert_with(Box::default);
                    for element in elements {
                        items.observe(element);
                    }
                }
            }
            _ => {}
        }
    }

    /// Update `current` with a new observation, creating the tree on first
    /// contact. Non-object top-level payloads are captured by the root
    /// metadata alone.
    pub fn learn(current: Option<Self>, value: &Value) -> Self {
        let mut node = current.unwrap_or_default();
        node.observe(value);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn learns_object_fields_with_types() {
        let schema = SchemaNode::learn(None, &json!({"a": "x", "b": 1}));
        assert_eq!(schema.meta.primary_type(), Some(JsonType::Object));
        assert_eq!(
            schema.children["a"].meta.primary_type(),
            Some(JsonType::String)
        );
        assert_eq!(
            schema.children["b"].meta.primary_type(),
            Some(JsonType::Integer)
        );
    }

    #[test]
    fn null_sets_nullable_without_adding_a_type() {
        let schema = SchemaNode::learn(None, &json!({"a": null}));
        let field = &schema.children["a"];
        assert!(field.meta.nullable);
        assert!(field.meta.types_seen.is_empty());
        assert_eq!(field.meta.primary_type(), None);

        // A later real value adds the type while nullable stays set
        let schema = SchemaNode::learn(Some(schema), &json!({"a": 3}));
        let field = &schema.children["a"];
        assert!(field.meta.nullable);
        assert_eq!(field.meta.primary_type(), Some(JsonType::Integer));
    }

    #[test]
    fn all_array_elements_are_observed() {
        let schema = SchemaNode::learn(None, &json!([{"a": 1}, {"b": "x"}]));
        let items = schema.items.as_deref().expect("items node learned");
        assert!(items.children.contains_key("a"));
        assert!(items.children.contains_key("b"));
    }

    #[test]
    fn union_types_accumulate() {
        let schema = SchemaNode::learn(None, &json!({"v": 1}));
        let schema = SchemaNode::learn(Some(schema), &json!({"v": "one"}));
        let field = &schema.children["v"];
        assert!(field.meta.types_seen.contains(&JsonType::Integer));
        assert!(field.meta.types_seen.contains(&JsonType::String));
        // Preference order resolves string over integer
        assert_eq!(field.meta.primary_type(), Some(JsonType::String));
    }

    #[test]
    fn non_object_top_level_payload_is_captured_without_children() {
        let schema = SchemaNode::learn(None, &json!("just a string"));
        assert_eq!(schema.meta.primary_type(), Some(JsonType::String));
        assert!(schema.children.is_empty());
        assert!(schema.items.is_none());
    }

    #[test]
    fn serde_round_trip() {
        let schema = SchemaNode::learn(None, &json!({"a": [1, 2], "b": {"c": null}}));
        let text = serde_json::to_string(&schema).expect("serializes");
        let back: SchemaNode = serde_json::from_str(&text).expect("deserializes");
        assert_eq!(schema, back);
    }
}
