use serde_json::Value;
use tracing::warn;

use crate::metrics::METRICS;
use crate::models::claude::ClaudeTool;
use crate::models::openai::{BackendTool, BackendToolChoice};
use crate::registry::ProviderKind;
use crate::transform::schema::{is_well_formed, normalize_schema};

/// Convert Claude tool definitions to backend function definitions
pub fn transform_tools(tools: &[ClaudeTool], kind: ProviderKind) -> Vec<BackendTool> {
    tools.iter().map(|tool| transform_tool(tool, kind)).collect()
}

fn transform_tool(tool: &ClaudeTool, kind: ProviderKind) -> BackendTool {
    if !is_well_formed(&tool.input_schema) {
        warn!(
            tool = %tool.name,
            "Tool schema lacks type/properties, replaced with empty object schema"
        );
        METRICS.record_degraded();
    }
    BackendTool::function(
        tool.name.clone(),
        tool.description.clone(),
        normalize_schema(&tool.input_schema, kind),
    )
}

/// `auto -> auto`, `any -> any`, `tool{name} -> forced call`; anything else is auto
pub fn transform_tool_choice(choice: &Value) -> BackendToolChoice {
    match choice.get("type").and_then(Value::as_str) {
        Some("any") => BackendToolChoice::Any,
        Some("tool") => match choice.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => BackendToolChoice::Tool(name.to_string()),
            _ => BackendToolChoice::Auto,
        },
        _ => BackendToolChoice::Auto,
    }
}

/// Flatten tool_result content into one text blob.
///
/// Strings pass through, text blocks contribute their text, other objects are
/// JSON-encoded, and list entries are joined with newlines.
pub fn flatten_tool_result(content: &Value) -> String {
    match content {
        Value::Null => "No content provided".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_item)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        Value::Object(_) => flatten_item(content),
        other => other.to_string(),
    }
}

fn flatten_item(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        Value::Object(obj) => match obj.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => item.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_equivalent_shapes() {
        let expected = "file contents";
        assert_eq!(flatten_tool_result(&json!("file contents")), expected);
        assert_eq!(
            flatten_tool_result(&json!([{"type": "text", "text": "file contents"}])),
            expected
        );
        assert_eq!(
            flatten_tool_result(&json!({"type": "text", "text": "file contents"})),
            expected
        );
    }

    #[test]
    fn test_flatten_mixed_list() {
        let content = json!([
            {"type": "text", "text": "line one"},
            "line two",
            {"type": "image", "source": {"type": "base64"}},
            7
        ]);
        assert_eq!(
            flatten_tool_result(&content),
            "line one\nline two\n{\"source\":{\"type\":\"base64\"},\"type\":\"image\"}\n7"
        );
    }

    #[test]
    fn test_flatten_edge_values() {
        assert_eq!(flatten_tool_result(&Value::Null), "No content provided");
        assert_eq!(flatten_tool_result(&json!({"exit_code": 0})), "{\"exit_code\":0}");
        assert_eq!(flatten_tool_result(&json!(true)), "true");
        assert_eq!(flatten_tool_result(&json!([])), "");
        assert_eq!(flatten_tool_result(&json!(["  padded  "])), "padded");
    }

    #[test]
    fn test_tool_choice_mapping() {
        assert_eq!(transform_tool_choice(&json!({"type": "auto"})), BackendToolChoice::Auto);
        assert_eq!(transform_tool_choice(&json!({"type": "any"})), BackendToolChoice::Any);
        assert_eq!(
            transform_tool_choice(&json!({"type": "tool", "name": "get_weather"})),
            BackendToolChoice::Tool("get_weather".to_string())
        );
        assert_eq!(transform_tool_choice(&json!({"type": "tool"})), BackendToolChoice::Auto);
        assert_eq!(transform_tool_choice(&json!({"type": "none"})), BackendToolChoice::Auto);
        assert_eq!(transform_tool_choice(&json!("any")), BackendToolChoice::Auto);
    }

    #[test]
    fn test_transform_tools_normalizes_schema() {
        let tools = vec![
            ClaudeTool {
                name: "get_weather".to_string(),
                description: Some("Get weather".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"city": {"type": "string", "default": "Paris"}}
                }),
            },
            ClaudeTool {
                name: "noop".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            },
        ];

        let converted = transform_tools(&tools, ProviderKind::Gemini);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].tool_type, "function");
        assert_eq!(
            converted[0].function.parameters,
            json!({"type": "object", "properties": {"city": {"type": "string"}}})
        );
        assert_eq!(
            converted[1].function.parameters,
            json!({"type": "object", "properties": {}})
        );
    }
}
