//! Backend request/response shapes in the OpenAI chat-completions dialect.
//!
//! The Anthropic-native client converts to and from these at its own boundary,
//! so translators only ever see one backend shape.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRequest {
    pub model: String,
    pub messages: Vec<BackendMessage>,
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Only set for Anthropic-native targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    pub stream: bool,

    /// Asks chat-completions backends for a trailing usage chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<BackendTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<BackendToolChoice>,

    /// Only set for Anthropic-native targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendMessage {
    pub role: BackendRole,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BackendContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl BackendMessage {
    pub fn text(role: BackendRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(BackendContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: BackendRole::Tool,
            content: Some(BackendContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// All text carried by the message, parts joined without separator
    pub fn text_content(&self) -> String {
        match &self.content {
            Some(BackendContent::Text(text)) => text.clone(),
            Some(BackendContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackendContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

impl BackendTool {
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: function_type(),
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

/// Tool choice, serialized in chat-completions form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendToolChoice {
    Auto,
    /// Model must call some tool (`"required"` on chat-completions backends)
    Any,
    Tool(String),
}

impl Serialize for BackendToolChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Any => serializer.serialize_str("required"),
            Self::Tool(name) => json!({"type": "function", "function": {"name": name}})
                .serialize(serializer),
        }
    }
}

/// A complete backend reply, decoded once at the translator boundary
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    Completion(ChatCompletion),
    Unknown(Value),
}

impl BackendResponse {
    pub fn decode(value: Value) -> Self {
        let looks_like_completion = value.get("choices").is_some_and(Value::is_array);
        if looks_like_completion
            && let Ok(completion) = serde_json::from_value::<ChatCompletion>(value.clone())
        {
            return Self::Completion(completion);
        }
        Self::Unknown(value)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(serde_json::from_slice(bytes)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

/// Tool call as returned by a backend; arguments may be a JSON string or an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ResponseFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// One incremental unit of a streamed backend reply
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    Chunk(ChatCompletionChunk),
    Unknown(Value),
}

impl StreamFragment {
    /// Decode one SSE `data:` payload
    pub fn decode(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        Ok(match serde_json::from_value::<ChatCompletionChunk>(value.clone()) {
            Ok(chunk) if value.get("choices").is_some() || value.get("usage").is_some() => {
                Self::Chunk(chunk)
            }
            _ => Self::Unknown(value),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

impl ChatCompletionChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: Some(text.into()),
                    tool_calls: None,
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: None,
                    tool_calls: Some(vec![delta]),
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                finish_reason: Some(reason.into()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(CompletionUsage {
            prompt_tokens,
            completion_tokens,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Backend-side tool index; some backends omit it
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    pub fn new(index: u32) -> Self {
        Self {
            index: Some(index),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).arguments = Some(arguments);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    /// String fragment or a whole structured object
    #[serde(default)]
    pub arguments: Option<Value>,
}
