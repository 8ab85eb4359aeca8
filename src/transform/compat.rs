//! OpenAI chat-completions callers served through the Messages pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{GatewayError, Result};
use crate::models::claude::{
    ClaudeMessage, ClaudeResponse, ClaudeRequest, ResponseBlock, StopReason, SystemPrompt,
};
use crate::models::openai::{FunctionCall, ToolCall};

/// max_tokens when a chat-completions caller sends none
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsRequest {
    pub model: String,
    pub messages: Vec<ChatRequestMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// A single string or a list
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequestMessage {
    pub role: String,
    /// A string, a list of content parts, or null
    #[serde(default)]
    pub content: Value,
}

impl ChatRequestMessage {
    /// Text of a string content or of its `text` parts
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Build the Messages request for a chat-completions call.
///
/// `system` and `developer` turns become the system prompt; only `user` and
/// `assistant` turns are accepted besides those.
pub fn chat_to_claude(request: ChatCompletionsRequest) -> Result<ClaudeRequest> {
    let mut system = Vec::new();
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => system.push(message.text()),
            "user" => messages.push(ClaudeMessage::user(message.text())),
            "assistant" => messages.push(ClaudeMessage::assistant(message.text())),
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "Unsupported message role '{}'",
                    other
                )));
            }
        }
    }

    let system = system.join("\n\n");
    let stop_sequences = match request.stop {
        Some(Value::String(stop)) => Some(vec![stop]),
        Some(Value::Array(stops)) => Some(
            stops
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    };

    Ok(ClaudeRequest {
        model: request.model,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_CHAT_MAX_TOKENS),
        messages,
        system: (!system.is_empty()).then_some(SystemPrompt::Text(system)),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences,
        stream: request.stream,
        metadata: None,
        tools: None,
        tool_choice: None,
        thinking: None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionReply {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatReplyChoice>,
    pub usage: ChatReplyUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReplyChoice {
    pub index: u32,
    pub message: ChatReplyMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReplyMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatReplyUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

fn finish_reason(stop_reason: Option<StopReason>) -> &'static str {
    match stop_reason {
        Some(StopReason::MaxTokens) => "length",
        Some(StopReason::ToolUse) => "tool_calls",
        Some(StopReason::EndTurn | StopReason::StopSequence) | None => "stop",
    }
}

/// Wrap a Messages reply as a `chat.completion`
pub fn claude_to_chat_completion(message: &ClaudeResponse) -> ChatCompletionReply {
    let tool_calls: Vec<ToolCall> = message
        .content
        .iter()
        .filter_map(|block| match block {
            ResponseBlock::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ResponseBlock::Text { .. } => None,
        })
        .collect();

    let text = message.text();
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    ChatCompletionReply {
        id: format!("chatcmpl-{}", message.id),
        object: "chat.completion",
        created,
        model: message.model.clone(),
        choices: vec![ChatReplyChoice {
            index: 0,
            message: ChatReplyMessage {
                role: "assistant",
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: finish_reason(message.stop_reason),
        }],
        usage: ChatReplyUsage {
            prompt_tokens: message.usage.input_tokens,
            completion_tokens: message.usage.output_tokens,
            total_tokens: message.usage.input_tokens + message.usage.output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::claude::{MessageContent, Role};
    use serde_json::json;

    fn chat(body: Value) -> ChatCompletionsRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_chat_request_to_claude() {
        let request = chat_to_claude(chat(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": [{"type": "text", "text": "Hi"}]},
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "Again"}
            ],
            "temperature": 0.3,
            "stop": "END"
        })))
        .unwrap();

        assert_eq!(request.max_tokens, DEFAULT_CHAT_MAX_TOKENS);
        assert_eq!(request.system.unwrap().text(), "Be brief.");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.stop_sequences, Some(vec!["END".to_string()]));
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert!(matches!(&request.messages[0].content, MessageContent::Text(t) if t == "Hi"));
    }

    #[test]
    fn test_unsupported_role_rejected() {
        let err = chat_to_claude(chat(json!({
            "model": "m",
            "messages": [{"role": "tool", "content": "x"}]
        })))
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_tool_use_reply_shape() {
        let mut message = ClaudeResponse::new(
            "claude-sonnet-4",
            vec![ResponseBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "search".to_string(),
                input: json!({"q": "rust"}),
            }],
        );
        message.stop_reason = Some(StopReason::ToolUse);

        let reply = claude_to_chat_completion(&message);
        let choice = &reply.choices[0];
        assert_eq!(choice.finish_reason, "tool_calls");
        assert!(choice.message.content.is_none());
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.arguments, r#"{"q":"rust"}"#);
    }
}
