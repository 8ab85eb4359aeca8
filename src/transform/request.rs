use tracing::{debug, warn};

use crate::metrics::METRICS;
use crate::models::claude::{
    ClaudeMessage, ClaudeRequest, ContentBlock, ImageSource, MessageContent, Role,
};
use crate::models::openai::{
    BackendContent, BackendMessage, BackendRequest, BackendRole, ContentPart, FunctionCall,
    ImageUrl, StreamOptions, ToolCall,
};
use crate::registry::ApiDialect;
use crate::router::RouteTarget;
use crate::transform::tools::{flatten_tool_result, transform_tool_choice, transform_tools};

/// Stand-in for a message whose every block was dropped
const EMPTY_MESSAGE_PLACEHOLDER: &str = "...";

/// Build the backend request for a routed Claude request.
///
/// Never fails: content the backend cannot express is dropped with a warning.
pub fn translate_request(req: &ClaudeRequest, target: &RouteTarget) -> BackendRequest {
    let dialect = target.kind.dialect();
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &req.system {
        let text = system.text();
        if !text.is_empty() {
            messages.push(BackendMessage::text(BackendRole::System, text));
        }
    }

    for message in &req.messages {
        match message.role {
            Role::User => translate_user_message(message, &mut messages),
            Role::Assistant => messages.push(translate_assistant_message(message)),
        }
    }

    let max_tokens = match target.kind.max_tokens_ceiling() {
        Some(ceiling) if req.max_tokens > ceiling => {
            debug!(
                requested = req.max_tokens,
                ceiling,
                provider = %target.provider,
                "Clamped max_tokens to backend ceiling"
            );
            METRICS.record_clamp();
            ceiling
        }
        _ => req.max_tokens,
    };

    let tools = req
        .tools
        .as_deref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| transform_tools(tools, target.kind));

    // tool_choice without tools is rejected by chat-completions backends
    let tool_choice = match (&tools, &req.tool_choice) {
        (Some(_), Some(choice)) => Some(transform_tool_choice(choice)),
        _ => None,
    };

    let anthropic_native = dialect == ApiDialect::AnthropicNative;

    BackendRequest {
        model: target.model.clone(),
        messages,
        max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k.filter(|_| anthropic_native),
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        stream: req.stream,
        stream_options: (req.stream && !anthropic_native).then_some(StreamOptions {
            include_usage: true,
        }),
        tools,
        tool_choice,
        thinking: req.thinking.clone().filter(|_| anthropic_native),
    }
}

/// User turns may expand into several backend messages: every tool_result
/// becomes its own `tool` message, the surrounding content stays `user`.
fn translate_user_message(message: &ClaudeMessage, out: &mut Vec<BackendMessage>) {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            out.push(BackendMessage::text(BackendRole::User, text.clone()));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let start = out.len();
    let mut pending: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => pending.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => match image_part(source) {
                Some(part) => pending.push(part),
                None => degrade("image", "unsupported image source"),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                flush_user_parts(&mut pending, out);
                out.push(BackendMessage::tool_result(
                    tool_use_id.clone(),
                    flatten_tool_result(content),
                ));
            }
            ContentBlock::Thinking { .. } => {}
            ContentBlock::ToolUse { name, .. } => {
                warn!(tool = %name, "Dropping tool_use block found in a user message");
                METRICS.record_degraded();
            }
            ContentBlock::Unknown => degrade("unknown", "unsupported block type"),
        }
    }
    flush_user_parts(&mut pending, out);

    if out.len() == start {
        out.push(BackendMessage::text(
            BackendRole::User,
            EMPTY_MESSAGE_PLACEHOLDER,
        ));
    }
}

fn flush_user_parts(pending: &mut Vec<ContentPart>, out: &mut Vec<BackendMessage>) {
    if pending.is_empty() {
        return;
    }
    let parts = std::mem::take(pending);
    out.push(BackendMessage {
        role: BackendRole::User,
        content: Some(parts_to_content(parts)),
        tool_calls: None,
        tool_call_id: None,
    });
}

fn parts_to_content(parts: Vec<ContentPart>) -> BackendContent {
    if let [ContentPart::Text { text }] = parts.as_slice() {
        return BackendContent::Text(text.clone());
    }
    BackendContent::Parts(parts)
}

fn translate_assistant_message(message: &ClaudeMessage) -> BackendMessage {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            return BackendMessage::text(BackendRole::Assistant, text.clone());
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| input.to_string()),
                },
            }),
            ContentBlock::Thinking { .. } => {}
            ContentBlock::Image { .. } => {
                degrade("image", "images are not sent from assistant turns")
            }
            ContentBlock::ToolResult { tool_use_id, .. } => {
                warn!(
                    tool_use_id = %tool_use_id,
                    "Dropping tool_result block found in an assistant message"
                );
                METRICS.record_degraded();
            }
            ContentBlock::Unknown => degrade("unknown", "unsupported block type"),
        }
    }

    if tool_calls.is_empty() {
        let text = texts.join("\n");
        let text = if text.is_empty() {
            EMPTY_MESSAGE_PLACEHOLDER.to_string()
        } else {
            text
        };
        return BackendMessage::text(BackendRole::Assistant, text);
    }

    METRICS.record_tool_calls(tool_calls.len());
    let text = texts.join(" ");
    BackendMessage {
        role: BackendRole::Assistant,
        content: (!text.trim().is_empty()).then(|| BackendContent::Text(text)),
        tool_calls: Some(tool_calls),
        tool_call_id: None,
    }
}

fn image_part(source: &ImageSource) -> Option<ContentPart> {
    let url = match source.source_type.as_str() {
        "base64" => {
            let media_type = source.media_type.as_deref().unwrap_or("image/png");
            format!("data:{};base64,{}", media_type, source.data.as_deref()?)
        }
        "url" => source.url.clone()?,
        _ => return None,
    };
    Some(ContentPart::ImageUrl {
        image_url: ImageUrl { url },
    })
}

fn degrade(block_type: &str, reason: &str) {
    warn!(block_type = %block_type, "Dropping content block: {}", reason);
    METRICS.record_degraded();
}

/// Input token estimate for a translated request: one token per four characters
/// of message, system and tool-definition text, never below 1
pub fn estimate_input_tokens(request: &BackendRequest) -> u32 {
    let message_chars: usize = request
        .messages
        .iter()
        .map(|m| {
            m.text_content().chars().count()
                + m.tool_calls
                    .iter()
                    .flatten()
                    .map(|c| c.function.name.len() + c.function.arguments.chars().count())
                    .sum::<usize>()
        })
        .sum();
    let tool_chars: usize = request
        .tools
        .iter()
        .flatten()
        .map(|t| {
            t.function.name.len()
                + t.function.description.as_deref().map_or(0, |d| d.chars().count())
                + t.function.parameters.to_string().len()
        })
        .sum();
    ((message_chars + tool_chars) / 4).max(1) as u32
}
