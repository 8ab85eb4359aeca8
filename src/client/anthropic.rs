//! Client for Anthropic's native Messages API.
//!
//! Requests arrive in the shared chat-completions shape and are converted back
//! into Messages form here; replies and stream events are converted into the
//! chat-completions shape before they leave this module.

use futures::{StreamExt, future};
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::metrics::METRICS;
use crate::models::openai::{
    BackendContent, BackendMessage, BackendRequest, BackendResponse, BackendRole,
    BackendToolChoice, ChatCompletion, ChatCompletionChunk, Choice, ChoiceMessage,
    CompletionUsage, ContentPart, ResponseFunction, ResponseToolCall, StreamFragment,
    ToolCallDelta,
};
use crate::provider::{BackendReply, FragmentStream, InvokeFuture, Provider};
use crate::registry::ProviderDescriptor;
use crate::streaming::SseEvent;
use crate::transform::response::parse_arguments;

use super::{read_body, send, sse_events};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    id: String,
    url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl AnthropicClient {
    pub fn new(client: Client, descriptor: &ProviderDescriptor, timeout_secs: u64) -> Self {
        Self {
            client,
            id: descriptor.id.clone(),
            url: format!("{}/messages", descriptor.base_url.trim_end_matches('/')),
            api_key: descriptor.api_key.clone(),
            timeout_secs,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn invoke_impl(
        client: Client,
        id: String,
        url: String,
        api_key: Option<String>,
        timeout_secs: u64,
        request: BackendRequest,
    ) -> Result<BackendReply> {
        let body = to_messages_body(&request);
        info!(
            provider = %id,
            model = %request.model,
            stream = request.stream,
            "Sending messages request"
        );

        let payload = serde_json::to_vec(&body)?;
        let mut builder = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION)
            .body(payload);
        if let Some(key) = api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.header("x-api-key", key);
        }

        let response = send(builder, timeout_secs).await?;

        if !request.stream {
            let bytes = read_body(response, timeout_secs).await?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                GatewayError::Transport(format!("Invalid JSON from {}: {}", id, e))
            })?;
            return Ok(BackendReply::Complete(from_messages_response(value)));
        }

        let fragments: FragmentStream = Box::pin(sse_events(response, timeout_secs).filter_map(
            |event| {
                future::ready(match event {
                    Ok(event) => convert_stream_event(&event).transpose(),
                    Err(e) => Some(Err(e)),
                })
            },
        ));
        debug!(provider = %id, "Streaming response started");
        Ok(BackendReply::Stream(fragments))
    }
}

impl Provider for AnthropicClient {
    fn invoke(&self, request: BackendRequest) -> InvokeFuture {
        let client = self.client.clone();
        let id = self.id.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let timeout_secs = self.timeout_secs;

        Box::pin(async move {
            Self::invoke_impl(client, id, url, api_key, timeout_secs, request).await
        })
    }

    fn name(&self) -> &str {
        &self.id
    }
}

/// Build a Messages API body from the shared backend request
pub fn to_messages_body(request: &BackendRequest) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == BackendRole::System)
        .map(BackendMessage::text_content)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for message in &request.messages {
        let (role, blocks) = match message.role {
            BackendRole::System => continue,
            BackendRole::User => ("user", content_blocks(message.content.as_ref())),
            BackendRole::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.text_content(),
                })],
            ),
            BackendRole::Assistant => ("assistant", assistant_blocks(message)),
        };

        // tool results and the user text that follows them share one turn
        if let Some((last_role, last_blocks)) = messages.last_mut()
            && *last_role == role
        {
            last_blocks.extend(blocks);
        } else {
            messages.push((role, blocks));
        }
    }

    let messages: Vec<Value> = messages
        .into_iter()
        .map(|(role, mut blocks)| {
            if blocks.is_empty() {
                blocks.push(json!({"type": "text", "text": "..."}));
            }
            json!({"role": role, "content": blocks})
        })
        .collect();

    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("max_tokens".into(), json!(request.max_tokens));
    body.insert("messages".into(), Value::Array(messages));
    body.insert("stream".into(), json!(request.stream));
    if !system.is_empty() {
        body.insert("system".into(), json!(system));
    }
    if let Some(temperature) = request.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(top_k) = request.top_k {
        body.insert("top_k".into(), json!(top_k));
    }
    if let Some(stop) = &request.stop {
        body.insert("stop_sequences".into(), json!(stop));
    }
    if let Some(tools) = &request.tools {
        let tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut entry = json!({
                    "name": tool.function.name,
                    "input_schema": tool.function.parameters,
                });
                if let Some(description) = &tool.function.description {
                    entry["description"] = json!(description);
                }
                entry
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &request.tool_choice {
        let choice = match choice {
            BackendToolChoice::Auto => json!({"type": "auto"}),
            BackendToolChoice::Any => json!({"type": "any"}),
            BackendToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        };
        body.insert("tool_choice".into(), choice);
    }
    if let Some(thinking) = &request.thinking {
        body.insert("thinking".into(), thinking.clone());
    }
    Value::Object(body)
}

fn content_blocks(content: Option<&BackendContent>) -> Vec<Value> {
    match content {
        Some(BackendContent::Text(text)) if !text.is_empty() => {
            vec![json!({"type": "text", "text": text})]
        }
        Some(BackendContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::ImageUrl { image_url } => Some(image_block(&image_url.url)),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn image_block(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        });
    }
    json!({"type": "image", "source": {"type": "url", "url": url}})
}

fn assistant_blocks(message: &BackendMessage) -> Vec<Value> {
    let mut blocks = content_blocks(message.content.as_ref());
    for call in message.tool_calls.iter().flatten() {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": parse_arguments(&Value::String(call.function.arguments.clone())),
        }));
    }
    blocks
}

fn finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// Convert a Messages API reply into the shared completion shape
pub fn from_messages_response(value: Value) -> BackendResponse {
    let Some(blocks) = value
        .get("content")
        .and_then(Value::as_array)
        .filter(|_| value.get("type").and_then(Value::as_str) == Some("message"))
    else {
        return BackendResponse::Unknown(value);
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block.get("text").and_then(Value::as_str).unwrap_or("")),
            Some("tool_use") => tool_calls.push(ResponseToolCall {
                id: block.get("id").and_then(Value::as_str).map(str::to_string),
                function: ResponseFunction {
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                },
            }),
            _ => {}
        }
    }

    let usage = value.get("usage").map(|usage| CompletionUsage {
        prompt_tokens: token_count(usage, "input_tokens"),
        completion_tokens: token_count(usage, "output_tokens"),
    });

    BackendResponse::Completion(ChatCompletion {
        id: value.get("id").and_then(Value::as_str).map(str::to_string),
        model: value.get("model").and_then(Value::as_str).map(str::to_string),
        choices: vec![Choice {
            index: 0,
            message: Some(ChoiceMessage {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            }),
            finish_reason: value
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(|reason| finish_reason(reason).to_string()),
        }],
        usage,
    })
}

fn token_count(usage: &Value, field: &str) -> u32 {
    usage.get(field).and_then(Value::as_u64).unwrap_or(0) as u32
}

/// Convert one Messages SSE event into a stream fragment; `None` for events with no counterpart
pub fn convert_stream_event(event: &SseEvent) -> Result<Option<StreamFragment>> {
    let value: Value = match serde_json::from_str(&event.data) {
        Ok(value) => value,
        Err(e) => {
            warn!("Skipping undecodable stream payload: {}", e);
            METRICS.record_degraded();
            return Ok(None);
        }
    };
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .or(event.event.as_deref())
        .unwrap_or_default();
    let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;

    let chunk = match event_type {
        "message_start" => {
            let input = value
                .pointer("/message/usage")
                .map(|usage| token_count(usage, "input_tokens"))
                .unwrap_or(0);
            ChatCompletionChunk::default().with_usage(input, 0)
        }
        "content_block_start" => {
            let block = &value["content_block"];
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                return Ok(None);
            }
            let mut delta = ToolCallDelta::new(index)
                .with_name(block.get("name").and_then(Value::as_str).unwrap_or_default());
            delta.id = block.get("id").and_then(Value::as_str).map(str::to_string);
            ChatCompletionChunk::tool_call(delta)
        }
        "content_block_delta" => {
            let delta = &value["delta"];
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => ChatCompletionChunk::text(
                    delta.get("text").and_then(Value::as_str).unwrap_or_default(),
                ),
                Some("input_json_delta") => ChatCompletionChunk::tool_call(
                    ToolCallDelta::new(index).with_arguments(
                        delta.get("partial_json").cloned().unwrap_or(Value::Null),
                    ),
                ),
                _ => return Ok(None),
            }
        }
        "message_delta" => {
            let reason = value
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(finish_reason)
                .unwrap_or("stop");
            let output = value
                .get("usage")
                .map(|usage| token_count(usage, "output_tokens"))
                .unwrap_or(0);
            ChatCompletionChunk::finish(reason).with_usage(0, output)
        }
        "error" => {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string();
            return Err(GatewayError::Upstream {
                status: 502,
                body: message,
            });
        }
        _ => return Ok(None),
    };
    Ok(Some(StreamFragment::Chunk(chunk)))
}
