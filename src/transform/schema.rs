use serde_json::{Map, Value, json};

use crate::registry::ProviderKind;

/// String `format` values Gemini accepts
const GEMINI_STRING_FORMATS: [&str; 2] = ["enum", "date-time"];

/// Keywords Gemini rejects anywhere in a schema
const GEMINI_STRIPPED_KEYWORDS: [&str; 2] = ["additionalProperties", "default"];

/// `{"type": "object", "properties": {}}`
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// An object carrying both `type` and `properties`
pub fn is_well_formed(schema: &Value) -> bool {
    schema
        .as_object()
        .is_some_and(|obj| obj.contains_key("type") && obj.contains_key("properties"))
}

/// Return a backend-safe copy of a tool's parameter schema.
///
/// Malformed input becomes the empty object schema; it is never passed through.
pub fn normalize_schema(schema: &Value, kind: ProviderKind) -> Value {
    if !is_well_formed(schema) {
        return empty_object_schema();
    }

    match kind {
        ProviderKind::Gemini => clean_for_gemini(schema),
        ProviderKind::OpenAi | ProviderKind::Anthropic => schema.clone(),
    }
}

fn clean_for_gemini(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(clean_schema_object(obj)),
        Value::Array(items) => Value::Array(items.iter().map(clean_for_gemini).collect()),
        other => other.clone(),
    }
}

fn clean_schema_object(obj: &Map<String, Value>) -> Map<String, Value> {
    let is_string = obj.get("type").and_then(Value::as_str) == Some("string");

    let mut cleaned = Map::with_capacity(obj.len());
    for (key, value) in obj {
        if GEMINI_STRIPPED_KEYWORDS.contains(&key.as_str()) {
            continue;
        }

        if key == "format"
            && is_string
            && !value
                .as_str()
                .is_some_and(|f| GEMINI_STRING_FORMATS.contains(&f))
        {
            continue;
        }

        let cleaned_value = match (key.as_str(), value) {
            // property names are user data, only their schemas are cleaned
            ("properties" | "$defs" | "definitions", Value::Object(props)) => Value::Object(
                props
                    .iter()
                    .map(|(name, schema)| (name.clone(), clean_for_gemini(schema)))
                    .collect(),
            ),
            _ => clean_for_gemini(value),
        };
        cleaned.insert(key.clone(), cleaned_value);
    }
    cleaned
}
