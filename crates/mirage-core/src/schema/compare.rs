//! Contract-change detection between two schema snapshots
//!
//! `compare` walks the snapshot learned *before* an observation against the
//! schema of the observed payload alone and classifies every difference by
//! severity. Comparing against the payload's own schema (rather than the
//! merged result) is what lets `field_removed` fire, since merging is
//! additive and never deletes a child.

use super::{FieldMeta, JsonType, SchemaNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How badly a contract change can hurt a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Client will crash or lose data.
    Breaking,
    /// Client may behave incorrectly.
    Warning,
    /// Safe change, good to know.
    Info,
}

/// The specific transition a field underwent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Field present in the old schema is absent from the new response.
    FieldRemoved,
    /// object → any non-object.
    ObjectToPrimitive,
    /// array → non-array.
    ArrayToNonArray,
    /// non-array → array.
    NonArrayToArray,
    /// Scalar type flip (string ↔ number ↔ boolean ↔ integer).
    TypeChanged,
    /// Field that had only ever been null now carries a real type.
    NullToTyped,
    /// Field absent in the old schema appeared.
    NewField,
    /// Field now sometimes returns null.
    FieldBecameNullable,
}

/// A single detected schema change, ready for persistence and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractChange {
    /// The transition kind.
    pub change_type: ChangeType,
    /// Severity classification.
    pub severity: Severity,
    /// JSONPath-like location, e.g. `$.user.roles[*].name`.
    pub path: String,
    /// Types observed at this path before the change.
    pub old_types: BTreeSet<JsonType>,
    /// Types observed in the new payload.
    pub new_types: BTreeSet<JsonType>,
    /// Whether the field was nullable before.
    pub old_nullable: bool,
    /// Whether the field is nullable now.
    pub new_nullable: bool,
    /// Human-readable description of the impact.
    pub explanation: String,
}

/// Compare two schema snapshots and return every classified difference.
///
/// `compare(s, s)` is empty for any schema `s`.
pub fn compare(old: &SchemaNode, new: &SchemaNode) -> Vec<ContractChange> {
    let mut changes = Vec::new();
    compare_nodes(old, new, "$", &mut changes);
    changes
}

fn compare_nodes(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<ContractChange>) {
    let old_primary = old.meta.primary_type();
    let new_primary = new.meta.primary_type();

    // Structural type change at this node. Shape rules (object/array) take
    // precedence over scalar rules.
    match (old_primary, new_primary) {
        (Some(old_ty), Some(new_ty)) if old_ty != new_ty => {
            classify_type_change(old_ty, new_ty, &old.meta, &new.meta, path, changes);
        }
        (Some(old_ty), None) if new.meta.nullable && !old.meta.nullable => {
            // Was a typed field, the new payload carried only null
            changes.push(ContractChange {
                change_type: ChangeType::FieldBecameNullable,
                severity: Severity::Info,
                path: path.to_string(),
                old_types: old.meta.types_seen.clone(),
                new_types: new.meta.types_seen.clone(),
                old_nullable: false,
                new_nullable: true,
                explanation: format!(
                    "Field `{path}` was always `{old_ty}` but now returned null. \
                     Consumers should add null-checks."
                ),
            });
        }
        _ => {}
    }

    // Nullability gained alongside a real type
    if !old.meta.nullable && new.meta.nullable && new_primary.is_some() {
        changes.push(ContractChange {
            change_type: ChangeType::FieldBecameNullable,
            severity: Severity::Info,
            path: path.to_string(),
            old_types: old.meta.types_seen.clone(),
            new_types: new.meta.types_seen.clone(),
            old_nullable: false,
            new_nullable: true,
            explanation: format!(
                "Field `{path}` was never null before but now returns null. \
                 Add null-checks or optional chaining."
            ),
        });
    }

    // Field was only ever null, now has a real type
    if old_primary.is_none() && old.meta.nullable {
        if let Some(new_ty) = new_primary {
            changes.push(ContractChange {
                change_type: ChangeType::NullToTyped,
                severity: Severity::Info,
                path: path.to_string(),
                old_types: old.meta.types_seen.clone(),
                new_types: new.meta.types_seen.clone(),
                old_nullable: true,
                new_nullable: new.meta.nullable,
                explanation: format!(
                    "Field `{path}` previously only returned null and now returns \
                     `{new_ty}`. Update consumer types to reflect it."
                ),
            });
        }
    }

    // Removed fields are breaking, new fields are additive
    for (key, old_child) in &old.children {
        if !new.children.contains_key(key) {
            changes.push(ContractChange {
                change_type: ChangeType::FieldRemoved,
                severity: Severity::Breaking,
                path: format!("{path}.{key}"),
                old_types: old_child.meta.types_seen.clone(),
                new_types: BTreeSet::new(),
                old_nullable: old_child.meta.nullable,
                new_nullable: false,
                explanation: format!(
                    "Field `{path}.{key}` (was `{}`) has been removed from the \
                     response. Client code reading it will see nothing.",
                    types_label(&old_child.meta)
                ),
            });
        }
    }
    for (key, new_child) in &new.children {
        if !old.children.contains_key(key) {
            changes.push(ContractChange {
                change_type: ChangeType::NewField,
                severity: Severity::Info,
                path: format!("{path}.{key}"),
                old_types: BTreeSet::new(),
                new_types: new_child.meta.types_seen.clone(),
                old_nullable: false,
                new_nullable: new_child.meta.nullable,
                explanation: format!(
                    "New field `{path}.{key}` appeared (type: `{}`). This is \
                     additive and safe for most consumers.",
                    types_label(&new_child.meta)
                ),
            });
        }
    }

    // Recurse into common children
    for (key, old_child) in &old.children {
        if let Some(new_child) = new.children.get(key) {
            compare_nodes(old_child, new_child, &format!("{path}.{key}"), changes);
        }
    }

    // Recurse into array items. A payload with an empty array produces no
    // items node; that is not an array-to-non-array transition.
    match (&old.items, &new.items) {
        (Some(old_items), Some(new_items)) => {
            compare_nodes(old_items, new_items, &format!("{path}[*]"), changes);
        }
        (Some(old_items), None) => {
            let still_array = new.meta.types_seen.contains(&JsonType::Array);
            if !still_array && new_primary.is_some() {
                changes.push(ContractChange {
                    change_type: ChangeType::ArrayToNonArray,
                    severity: Severity::Breaking,
                    path: format!("{path}[*]"),
                    old_types: old_items.meta.types_seen.clone(),
                    new_types: new.meta.types_seen.clone(),
                    old_nullable: old_items.meta.nullable,
                    new_nullable: new.meta.nullable,
                    explanation: format!(
                        "Field `{path}` was an array but is now `{}`. All array \
                         iteration over it will break.",
                        new_primary.map_or_else(|| "null".to_string(), |t| t.to_string())
                    ),
                });
            }
        }
        _ => {}
    }
}

fn classify_type_change(
    old_ty: JsonType,
    new_ty: JsonType,
    old_meta: &FieldMeta,
    new_meta: &FieldMeta,
    path: &str,
    changes: &mut Vec<ContractChange>,
) {
    let (change_type, severity, explanation) = if old_ty == JsonType::Object {
        (
            ChangeType::ObjectToPrimitive,
            Severity::Breaking,
            format!(
                "`{path}` changed from `object` to `{new_ty}`. Any nested field \
                 access on it will fail."
            ),
        )
    } else if old_ty == JsonType::Array {
        (
            ChangeType::ArrayToNonArray,
            Severity::Breaking,
            format!(
                "`{path}` changed from `array` to `{new_ty}`. Any iteration over \
                 it will fail."
            ),
        )
    } else if new_ty == JsonType::Array {
        (
            ChangeType::NonArrayToArray,
            Severity::Breaking,
            format!(
                "`{path}` changed from `{old_ty}` to `array`. Consumers expecting \
                 a scalar value will break."
            ),
        )
    } else {
        (
            ChangeType::TypeChanged,
            Severity::Warning,
            format!(
                "`{path}` changed type from `{old_ty}` to `{new_ty}`. Strict \
                 equality checks and arithmetic may behave incorrectly."
            ),
        )
    };

    changes.push(ContractChange {
        change_type,
        severity,
        path: path.to_string(),
        old_types: old_meta.types_seen.clone(),
        new_types: new_meta.types_seen.clone(),
        old_nullable: old_meta.nullable,
        new_nullable: new_meta.nullable,
        explanation,
    });
}

fn types_label(meta: &FieldMeta) -> String {
    if meta.types_seen.is_empty() {
        return "null".to_string();
    }
    meta.types_seen
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Drift score for a batch of changes: `10·breaking + 5·warning`, capped at 100.
pub fn drift_score(changes: &[ContractChange]) -> f64 {
    let breaking = changes.iter().filter(|c| c.severity == Severity::Breaking).count();
    let warnings = changes.iter().filter(|c| c.severity == Severity::Warning).count();
    (breaking as f64 * 10.0 + warnings as f64 * 5.0).min(100.0)
}

/// Short human summary of the severe changes in a batch (at most three named).
pub fn drift_summary(changes: &[ContractChange]) -> String {
    let severe: Vec<&ContractChange> = changes
        .iter()
        .filter(|c| matches!(c.severity, Severity::Breaking | Severity::Warning))
        .collect();
    if severe.is_empty() {
        return "no contract changes".to_string();
    }
    let named = severe
        .iter()
        .take(3)
        .map(|c| format!("{} at {}", change_type_key(c.change_type), c.path))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} contract change(s): {named}", severe.len())
}

fn change_type_key(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::FieldRemoved => "field_removed",
        ChangeType::ObjectToPrimitive => "object_to_primitive",
        ChangeType::ArrayToNonArray => "array_to_non_array",
        ChangeType::NonArrayToArray => "non_array_to_array",
        ChangeType::TypeChanged => "type_changed",
        ChangeType::NullToTyped => "null_to_typed",
        ChangeType::NewField => "new_field",
        ChangeType::FieldBecameNullable => "field_became_nullable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn learned(payloads: &[serde_json::Value]) -> SchemaNode {
        let mut schema = None;
        for payload in payloads {
            schema = Some(SchemaNode::learn(schema, payload));
        }
        schema.expect("at least one payload")
    }

    #[test]
    fn identical_schemas_produce_no_changes() {
        let schema = learned(&[json!({"a": "x", "b": [1, 2], "c": {"d": true}})]);
        assert!(compare(&schema, &schema).is_empty());
    }

    #[test]
    fn removed_nested_field_is_breaking() {
        let old = learned(&[json!({"user": {"avatar": "x"}})]);
        let new = learned(&[json!({"user": {}})]);
        let changes = compare(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::FieldRemoved);
        assert_eq!(changes[0].severity, Severity::Breaking);
        assert_eq!(changes[0].path, "$.user.avatar");
    }

    #[test]
    fn object_collapsing_to_string_is_breaking() {
        let old = learned(&[json!({"meta": {"k": 1}})]);
        let new = learned(&[json!({"meta": "gone"})]);
        let changes = compare(&old, &new);
        assert!(changes.iter().any(|c| {
            c.change_type == ChangeType::ObjectToPrimitive
                && c.severity == Severity::Breaking
                && c.path == "$.meta"
        }));
    }

    #[test]
    fn scalar_flip_is_a_warning() {
        let old = learned(&[json!({"count": 3})]);
        let new = learned(&[json!({"count": "three"})]);
        let changes = compare(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::TypeChanged);
        assert_eq!(changes[0].severity, Severity::Warning);
    }

    #[test]
    fn scalar_to_array_is_breaking() {
        let old = learned(&[json!({"tag": "a"})]);
        let new = learned(&[json!({"tag": ["a", "b"]})]);
        let changes = compare(&old, &new);
        assert!(changes
            .iter()
            .any(|c| c.change_type == ChangeType::NonArrayToArray
                && c.severity == Severity::Breaking));
    }

    #[test]
    fn new_field_is_info() {
        let old = learned(&[json!({"a": 1})]);
        let new = learned(&[json!({"a": 1, "b": "fresh"})]);
        let changes = compare(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::NewField);
        assert_eq!(changes[0].severity, Severity::Info);
        assert_eq!(changes[0].path, "$.b");
    }

    #[test]
    fn gaining_null_is_info() {
        let old = learned(&[json!({"a": "x"})]);
        let new = learned(&[json!({"a": null})]);
        let changes = compare(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::FieldBecameNullable);
        assert_eq!(changes[0].severity, Severity::Info);
    }

    #[test]
    fn only_null_to_typed_is_info() {
        let old = learned(&[json!({"a": null})]);
        let new = learned(&[json!({"a": 5})]);
        let changes = compare(&old, &new);
        assert!(changes
            .iter()
            .any(|c| c.change_type == ChangeType::NullToTyped && c.severity == Severity::Info));
    }

    #[test]
    fn array_item_changes_use_star_paths() {
        let old = learned(&[json!({"rows": [{"id": 1}]})]);
        let new = learned(&[json!({"rows": [{"id": "one"}]})]);
        let changes = compare(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "$.rows[*].id");
        assert_eq!(changes[0].severity, Severity::Warning);
    }

    #[test]
    fn empty_observed_array_is_not_array_to_non_array() {
        let old = learned(&[json!({"rows": [{"id": 1}]})]);
        let new = learned(&[json!({"rows": []})]);
        let changes = compare(&old, &new);
        assert!(!changes
            .iter()
            .any(|c| c.change_type == ChangeType::ArrayToNonArray));
    }

    #[test]
    fn score_weights_breaking_over_warning_and_caps() {
        let breaking = ContractChange {
            change_type: ChangeType::FieldRemoved,
            severity: Severity::Breaking,
            path: "$.a".to_string(),
            old_types: BTreeSet::new(),
            new_types: BTreeSet::new(),
            old_nullable: false,
            new_nullable: false,
            explanation: String::new(),
        };
        let warning = ContractChange {
            severity: Severity::Warning,
            change_type: ChangeType::TypeChanged,
            ..breaking.clone()
        };
        assert_eq!(drift_score(&[breaking.clone(), warning.clone()]), 15.0);
        let many: Vec<ContractChange> = std::iter::repeat(breaking).take(30).collect();
        assert_eq!(drift_score(&many), 100.0);
    }
}
