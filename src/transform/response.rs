use serde_json::{Map, Value, json};
use tracing::error;

use crate::error::{GatewayError, Result};
use crate::metrics::METRICS;
use crate::models::claude::{
    ClaudeRequest, ClaudeResponse, ResponseBlock, StopReason, Usage, new_tool_use_id,
};
use crate::models::openai::{BackendResponse, ChatCompletion, ResponseToolCall};

/// Convert a complete backend reply into a Claude message.
///
/// Never fails: an unexpected backend shape yields a text reply describing the
/// problem with zeroed usage.
pub fn translate_response(response: &BackendResponse, request: &ClaudeRequest) -> ClaudeResponse {
    match try_translate(response, request) {
        Ok(message) => message,
        Err(e) => {
            error!(model = %request.model, "Failed to convert backend response: {}", e);
            fallback_response(request, &e)
        }
    }
}

fn try_translate(response: &BackendResponse, request: &ClaudeRequest) -> Result<ClaudeResponse> {
    let completion = match response {
        BackendResponse::Completion(completion) => completion,
        BackendResponse::Unknown(value) => {
            return Err(GatewayError::Internal(format!(
                "unrecognized backend response shape: {}",
                truncate(&value.to_string(), 200)
            )));
        }
    };

    convert_completion(completion, request)
}

fn convert_completion(
    completion: &ChatCompletion,
    request: &ClaudeRequest,
) -> Result<ClaudeResponse> {
    let choice = completion
        .choices
        .first()
        .ok_or_else(|| GatewayError::Internal("backend response has no choices".to_string()))?;

    let mut content = Vec::new();

    if let Some(message) = &choice.message {
        if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
            content.push(ResponseBlock::Text {
                text: text.to_string(),
            });
        }

        if let Some(calls) = &message.tool_calls {
            METRICS.record_tool_calls(calls.len());
            content.extend(calls.iter().map(tool_use_block));
        }
    }

    if content.is_empty() {
        content.push(ResponseBlock::Text {
            text: String::new(),
        });
    }

    let usage = completion.usage.unwrap_or_default();

    let mut message = ClaudeResponse::new(request.model.clone(), content);
    message.stop_reason = Some(StopReason::from_finish_reason(
        choice.finish_reason.as_deref(),
    ));
    message.usage = Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        ..Default::default()
    };
    Ok(message)
}

fn tool_use_block(call: &ResponseToolCall) -> ResponseBlock {
    ResponseBlock::ToolUse {
        id: call
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_tool_use_id),
        name: call.function.name.clone(),
        input: parse_arguments(&call.function.arguments),
    }
}

/// Tool input must be an object; anything that does not parse to one is kept under `raw`
pub fn parse_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => Value::Object(Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => json!({"raw": raw}),
        },
        other => json!({"raw": other.to_string()}),
    }
}

fn fallback_response(request: &ClaudeRequest, err: &GatewayError) -> ClaudeResponse {
    let mut message = ClaudeResponse::new(
        request.model.clone(),
        vec![ResponseBlock::Text {
            text: format!("Error converting response: {}", err),
        }],
    );
    message.stop_reason = Some(StopReason::EndTurn);
    message
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
