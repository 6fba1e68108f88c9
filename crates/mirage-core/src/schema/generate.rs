//! Mock payload generation from a learned schema
//!
//! Generation resolves each node's dominant type through the fixed
//! preference order, then produces values: field-name heuristics first
//! (realistic emails, names, timestamps, prices), the recorded example
//! second, a type-appropriate default last. Scalars supplied by the caller
//! (the request body) are echoed when the learned schema knows the field.

use super::{JsonType, SchemaNode};
use fake::faker::address::en::{CityName, CountryName, StreetName};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::FreeEmail;
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::Name;
use fake::faker::phone_number::en::CellNumber;
use fake::Fake;
use rand::Rng;
use serde_json::{json, Map, Value};

/// Generate a mock body from a learned schema.
///
/// `request` is the parsed request body (if any); scalar fields that appear
/// by name in the learned schema are echoed into the output so that
/// identity-preserving routes round-trip. Returns `None` when the schema has
/// never seen a generatable value.
pub fn generate_body(schema: &SchemaNode, request: Option<&Value>) -> Option<Value> {
    generate_node("", schema, request)
}

fn generate_node(field_name: &str, node: &SchemaNode, request: Option<&Value>) -> Option<Value> {
    match node.meta.primary_type() {
        Some(JsonType::Object) => {
            let mut out = Map::new();
            for (key, child) in &node.children {
                if let Some(echoed) = echoed_scalar(request, key) {
                    out.insert(key.clone(), echoed);
                    continue;
                }
                let child_request = request
                    .and_then(Value::as_object)
                    .and_then(|map| map.get(key));
                if let Some(value) = generate_node(key, child, child_request) {
                    out.insert(key.clone(), value);
                }
            }
            Some(Value::Object(out))
        }
        Some(JsonType::Array) => {
            let Some(items) = node.items.as_deref() else {
                return Some(Value::Array(Vec::new()));
            };
            let len = rand::rng().random_range(1..=4);
            let elements = (0..len)
                .filter_map(|_| generate_node(field_name, items, None))
                .collect();
            Some(Value::Array(elements))
        }
        Some(primitive) => Some(generate_primitive(field_name, primitive, node)),
        None => node.meta.nullable.then_some(Value::Null),
    }
}

/// A scalar value for `key` in the caller-supplied request body, if any.
fn echoed_scalar(request: Option<&Value>, key: &str) -> Option<Value> {
    let value = request?.as_object()?.get(key)?;
    match value {
        Value::Object(_) | Value::Array(_) => None,
        scalar => Some(scalar.clone()),
    }
}

fn generate_primitive(field_name: &str, ty: JsonType, node: &SchemaNode) -> Value {
    if let Some(value) = heuristic_value(field_name, ty) {
        return value;
    }
    if let Some(example) = &node.meta.last_example {
        if JsonType::of(example) == Some(ty) {
            return example.clone();
        }
    }
    match ty {
        JsonType::String => json!(""),
        JsonType::Integer => json!(0),
        JsonType::Number => json!(0.0),
        JsonType::Boolean => json!(false),
        // Shapes are handled by generate_node
        JsonType::Object => json!({}),
        JsonType::Array => json!([]),
    }
}

/// Field-name driven realistic values. Only returns values of the learned
/// type so generated payloads stay compatible with `types_seen`.
fn heuristic_value(field_name: &str, ty: JsonType) -> Option<Value> {
    let name = field_name.to_ascii_lowercase();
    let mut rng = rand::rng();

    match ty {
        JsonType::String => {
            if name.contains("email") {
                return Some(json!(FreeEmail().fake::<String>()));
            }
            if name == "id" || name.ends_with("_id") || name.contains("uuid") {
                return Some(json!(uuid_string()));
            }
            if name.ends_with("_at") || name.contains("date") || name.contains("timestamp") {
                return Some(json!(chrono::Utc::now().to_rfc3339()));
            }
            if name.contains("url") || name.contains("link") || name.contains("website") {
                return Some(json!(format!("https://example.com/{}", rng.random_range(100..10_000))));
            }
            if name.contains("city") {
                return Some(json!(CityName().fake::<String>()));
            }
            if name.contains("country") {
                return Some(json!(CountryName().fake::<String>()));
            }
            if name.contains("phone") {
                return Some(json!(CellNumber().fake::<String>()));
            }
            if name.contains("street") || name.contains("address") {
                return Some(json!(StreetName().fake::<String>()));
            }
            if name.contains("company") || name.contains("organization") {
                return Some(json!(CompanyName().fake::<String>()));
            }
            if name.contains("description") || name.contains("summary") || name.contains("message")
            {
                return Some(json!(Sentence(4..9).fake::<String>()));
            }
            if name.contains("name") || name.contains("author") || name.contains("user") {
                return Some(json!(Name().fake::<String>()));
            }
            if name.contains("status") {
                let statuses = ["active", "pending", "completed", "archived"];
                return Some(json!(statuses[rng.random_range(0..statuses.len())]));
            }
            None
        }
        JsonType::Integer => {
            if name == "id" || name.ends_with("_id") {
                return Some(json!(rng.random_range(1..100_000)));
            }
            if name.contains("age") {
                return Some(json!(rng.random_range(18..80)));
            }
            if name.contains("count") || name.contains("quantity") || name.contains("total") {
                return Some(json!(rng.random_range(0..500)));
            }
            if name.contains("year") {
                return Some(json!(rng.random_range(1990..2030)));
            }
            None
        }
        JsonType::Number => {
            if name.contains("price") || name.contains("amount") || name.contains("cost") {
                let cents: f64 = rng.random_range(100..100_000) as f64;
                return Some(json!(cents / 100.0));
            }
            if name.contains("rating") || name.contains("score") {
                let tenths: f64 = rng.random_range(0..50) as f64;
                return Some(json!(tenths / 10.0));
            }
            if name.contains("lat") {
                return Some(json!(rng.random_range(-90.0..90.0)));
            }
            if name.contains("lon") || name.contains("lng") {
                return Some(json!(rng.random_range(-180.0..180.0)));
            }
            None
        }
        JsonType::Boolean => {
            if name.contains("active") || name.contains("enabled") || name.starts_with("is_")
                || name.starts_with("has_")
            {
                return Some(json!(rng.random_bool(0.5)));
            }
            None
        }
        JsonType::Object | JsonType::Array => None,
    }
}

fn uuid_string() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn learned(payload: serde_json::Value) -> SchemaNode {
        SchemaNode::learn(None, &payload)
    }

    #[test]
    fn generated_object_matches_learned_key_set() {
        let schema = learned(json!({"a": "x", "b": 1}));
        let body = generate_body(&schema, None).expect("object generated");
        let map = body.as_object().expect("is object");
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        assert_eq!(keys, ["a", "b"]);
        assert!(map["a"].is_string());
        assert!(map["b"].is_i64() || map["b"].is_u64());
    }

    #[test]
    fn arrays_generate_between_one_and_four_items() {
        let schema = learned(json!({"rows": [{"id": 1}]}));
        for _ in 0..20 {
            let body = generate_body(&schema, None).expect("generated");
            let rows = body["rows"].as_array().expect("rows is array");
            assert!((1..=4).contains(&rows.len()));
            for row in rows {
                assert!(row["id"].is_i64() || row["id"].is_u64());
            }
        }
    }

    #[test]
    fn request_scalars_are_echoed_by_name() {
        let schema = learned(json!({"name": "learned", "age": 30}));
        let body =
            generate_body(&schema, Some(&json!({"name": "Ada", "ignored": true}))).expect("body");
        assert_eq!(body["name"], json!("Ada"));
        assert!(body.get("ignored").is_none());
    }

    #[test]
    fn email_fields_look_like_emails() {
        let schema = learned(json!({"email": "seed@example.com"}));
        let body = generate_body(&schema, None).expect("body");
        let email = body["email"].as_str().expect("string");
        assert!(email.contains('@'));
    }

    #[test]
    fn nested_objects_recurse() {
        let schema = learned(json!({"user": {"city": "x", "roles": ["admin"]}}));
        let body = generate_body(&schema, None).expect("body");
        assert!(body["user"].is_object());
        assert!(body["user"]["city"].is_string());
        assert!(body["user"]["roles"].is_array());
    }

    #[test]
    fn null_only_schema_generates_null() {
        let schema = learned(json!({"ghost": null}));
        let body = generate_body(&schema, None).expect("body");
        assert!(body["ghost"].is_null());
    }

    #[test]
    fn unlearned_schema_generates_nothing() {
        let schema = SchemaNode::default();
        assert!(generate_body(&schema, None).is_none());
    }
}
