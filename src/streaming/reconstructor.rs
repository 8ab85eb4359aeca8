//! Rebuilds Anthropic's block-framed SSE protocol from unframed backend deltas.
//!
//! Event order for one stream:
//!
//! ```text
//! message_start, content_block_start(0, text), ping,
//! content_block_delta(0, text)*,
//! content_block_stop(0),                      -- on the first tool call or at the end
//! (content_block_start(n, tool_use), content_block_delta(n, input_json)*)*,
//! content_block_stop(n)*,                     -- ascending, at the end
//! message_delta(stop_reason), message_stop, [DONE]
//! ```

use std::convert::Infallible;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::metrics::METRICS;
use crate::models::claude::{
    BlockDelta, ClaudeResponse, ClaudeSSEEvent, DeltaUsage, MessageDeltaData, ResponseBlock,
    StopReason, Usage, new_message_id, new_tool_use_id,
};
use crate::models::openai::{ChatCompletionChunk, CompletionUsage, StreamFragment, ToolCallDelta};
use crate::streaming::state::{StreamState, TEXT_BLOCK_INDEX};

/// One unit written to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Sse(ClaudeSSEEvent),
    /// Literal `data: [DONE]` terminator
    Done,
}

impl StreamEvent {
    pub fn to_sse_string(&self) -> String {
        match self {
            Self::Sse(event) => event.to_sse_string(),
            Self::Done => "data: [DONE]\n\n".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sse(event) => event.event_name(),
            Self::Done => "[DONE]",
        }
    }
}

/// Summary of a finished stream, emitted once for history and logging
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub message_id: String,
    pub text: String,
    /// A stop reason, or "error"
    pub stop_reason: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub tool_calls: Vec<String>,
}

pub struct StreamReconstructor {
    message_id: String,
    model: String,
    state: StreamState,
    started: bool,
    stop_reason: Option<String>,
    record_taken: bool,
}

impl StreamReconstructor {
    /// `model` is echoed back to the caller as sent
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            model: model.into(),
            state: StreamState::new(),
            started: false,
            stop_reason: None,
            record_taken: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_terminal(&self) -> bool {
        self.state.terminal
    }

    /// Header events; empty after the first call
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let mut message = ClaudeResponse::new(self.model.clone(), Vec::new());
        message.id = self.message_id.clone();
        message.usage = Usage::default();

        vec![
            StreamEvent::Sse(ClaudeSSEEvent::MessageStart { message }),
            StreamEvent::Sse(ClaudeSSEEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseBlock::Text {
                    text: String::new(),
                },
            }),
            StreamEvent::Sse(ClaudeSSEEvent::Ping),
        ]
    }

    /// Translate one backend fragment.
    ///
    /// After the terminal sequence nothing is emitted; reported usage still
    /// updates the completion record until it is taken.
    pub fn push(&mut self, fragment: &StreamFragment) -> Vec<StreamEvent> {
        if self.state.terminal {
            if let StreamFragment::Chunk(chunk) = fragment
                && let Some(usage) = &chunk.usage
                && !self.record_taken
            {
                self.absorb_usage(usage);
            }
            return Vec::new();
        }
        let mut events = self.start();

        match fragment {
            StreamFragment::Chunk(chunk) => self.push_chunk(chunk, &mut events),
            StreamFragment::Unknown(value) => {
                warn!("Skipping unrecognized stream fragment: {}", value);
                METRICS.record_degraded();
            }
        }
        events
    }

    fn absorb_usage(&mut self, usage: &CompletionUsage) {
        if usage.prompt_tokens > 0 {
            self.state.input_tokens = usage.prompt_tokens;
        }
        if usage.completion_tokens > 0 {
            self.state.reported_output_tokens = Some(usage.completion_tokens);
        }
    }

    fn push_chunk(&mut self, chunk: &ChatCompletionChunk, events: &mut Vec<StreamEvent>) {
        if let Some(usage) = &chunk.usage {
            self.absorb_usage(usage);
        }

        let Some(choice) = chunk.choices.first() else {
            return;
        };

        if let Some(delta) = &choice.delta {
            let tool_calls = delta.tool_calls.as_deref().unwrap_or_default();

            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                if self.state.tools_started() {
                    debug!("Dropping text delta that arrived after tool calls");
                    self.state.push_late_text(text);
                } else {
                    self.state.push_text(text);
                    // packed together with a tool call: flushed when block 0 closes
                    if tool_calls.is_empty() {
                        self.forward_text(events);
                    }
                }
            }

            for (position, call) in tool_calls.iter().enumerate() {
                self.push_tool_call(position as u32, call, events);
            }
        }

        if let Some(reason) = &choice.finish_reason {
            events.extend(self.finish_with(Some(reason.as_str())));
        }
    }

    fn forward_text(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(text) = self.state.take_unforwarded() {
            events.push(StreamEvent::Sse(ClaudeSSEEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: BlockDelta::TextDelta { text },
            }));
        }
    }

    fn push_tool_call(
        &mut self,
        position: u32,
        call: &ToolCallDelta,
        events: &mut Vec<StreamEvent>,
    ) {
        self.close_text_block(events);

        let backend_index = self.tool_key(position, call);
        let function = call.function.as_ref();

        if self.state.tool(backend_index).is_none() {
            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_tool_use_id);
            let name = function.and_then(|f| f.name.clone()).unwrap_or_default();
            if name.is_empty() {
                warn!(backend_index, "Tool call opened without a name");
                METRICS.record_degraded();
            }
            METRICS.record_tool_calls(1);

            let block = self.state.open_tool(backend_index, id, name);
            events.push(StreamEvent::Sse(ClaudeSSEEvent::ContentBlockStart {
                index: block.index,
                content_block: ResponseBlock::ToolUse {
                    id: block.id.clone(),
                    name: block.name.clone(),
                    input: Value::Object(Map::new()),
                },
            }));
        }

        let fragment = match function.and_then(|f| f.arguments.as_ref()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(structured) => structured.to_string(),
        };
        if fragment.is_empty() {
            return;
        }

        if let Some(block) = self.state.tool(backend_index) {
            block.arguments.push_str(&fragment);
            events.push(StreamEvent::Sse(ClaudeSSEEvent::ContentBlockDelta {
                index: block.index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: fragment,
                },
            }));
        }
    }

    /// Backend key for a tool delta.
    ///
    /// Without an `index`, a delta carrying a new id opens its own block, and a
    /// delta without an id continues the most recently opened one.
    fn tool_key(&self, position: u32, call: &ToolCallDelta) -> u32 {
        if let Some(index) = call.index {
            return index;
        }
        let id = call.id.as_deref().filter(|id| !id.is_empty());
        match (self.state.last_opened(), id) {
            (None, _) => position,
            (Some((key, open_id)), Some(id)) if open_id == id => key,
            (Some(_), Some(_)) => self.state.unused_key(),
            (Some((key, _)), None) if position == 0 => key,
            (Some(_), None) => position,
        }
    }

    /// Flush pending text and close block 0; no-op once closed
    pub fn close_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.state.text_closed() {
            return;
        }
        self.forward_text(events);
        if self.state.close_text() {
            events.push(StreamEvent::Sse(ClaudeSSEEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            }));
        }
    }

    /// Close every open tool block in ascending index order; no-op for closed blocks
    pub fn close_tool_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        for index in self.state.close_tools() {
            events.push(StreamEvent::Sse(ClaudeSSEEvent::ContentBlockStop { index }));
        }
    }

    /// Upstream ended without a finish signal
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.finish_with(None)
    }

    fn finish_with(&mut self, finish_reason: Option<&str>) -> Vec<StreamEvent> {
        let stop_reason = StopReason::from_finish_reason(finish_reason);
        self.terminate(stop_reason.as_str())
    }

    /// Close the stream after an upstream or internal failure
    pub fn fail(&mut self, err: &GatewayError) -> Vec<StreamEvent> {
        if !self.state.terminal {
            warn!(message_id = %self.message_id, "Stream aborted: {}", err);
        }
        self.terminate("error")
    }

    fn terminate(&mut self, stop_reason: &str) -> Vec<StreamEvent> {
        if self.state.terminal {
            return Vec::new();
        }
        let mut events = self.start();

        self.close_tool_blocks(&mut events);
        self.close_text_block(&mut events);

        self.state.terminal = true;
        self.stop_reason = Some(stop_reason.to_string());

        events.push(StreamEvent::Sse(ClaudeSSEEvent::MessageDelta {
            delta: MessageDeltaData {
                stop_reason: stop_reason.to_string(),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.state.output_tokens(),
            },
        }));
        events.push(StreamEvent::Sse(ClaudeSSEEvent::MessageStop));
        events.push(StreamEvent::Done);
        events
    }

    /// The completion record, at most once per stream.
    ///
    /// Before the terminal sequence the record describes the partial output
    /// with stop reason "error".
    pub fn take_completion(&mut self) -> Option<CompletionRecord> {
        if std::mem::replace(&mut self.record_taken, true) {
            return None;
        }
        Some(CompletionRecord {
            message_id: self.message_id.clone(),
            text: self.state.full_text(),
            stop_reason: self
                .stop_reason
                .clone()
                .unwrap_or_else(|| "error".to_string()),
            input_tokens: self.state.input_tokens,
            output_tokens: self.state.output_tokens(),
            tool_calls: self.state.tool_blocks().map(|t| t.name.clone()).collect(),
        })
    }
}

struct Driver<S, F: FnOnce(CompletionRecord)> {
    upstream: S,
    reconstructor: StreamReconstructor,
    on_complete: Option<F>,
    finished: bool,
    upstream_done: bool,
}

impl<S, F: FnOnce(CompletionRecord)> Driver<S, F> {
    fn complete(&mut self) {
        if let Some(callback) = self.on_complete.take()
            && let Some(record) = self.reconstructor.take_completion()
        {
            callback(record);
        }
    }
}

// caller hung up before the terminal sequence
impl<S, F: FnOnce(CompletionRecord)> Drop for Driver<S, F> {
    fn drop(&mut self) {
        self.complete();
    }
}

/// Drive an upstream fragment stream through a reconstructor, yielding SSE bytes.
///
/// `on_complete` runs exactly once: after the terminal sequence has been
/// emitted and the rest of the upstream drained for trailing usage, or when
/// the output stream is dropped early.
pub fn reconstruct_stream<S, F>(
    upstream: S,
    reconstructor: StreamReconstructor,
    on_complete: F,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<StreamFragment>> + Send + Unpin + 'static,
    F: FnOnce(CompletionRecord) + Send + 'static,
{
    let driver = Driver {
        upstream,
        reconstructor,
        on_complete: Some(on_complete),
        finished: false,
        upstream_done: false,
    };

    stream::unfold(driver, |mut driver| async move {
        if driver.finished {
            // trailing usage-only chunks; stops at the first error
            while !driver.upstream_done
                && let Some(Ok(fragment)) = driver.upstream.next().await
            {
                driver.reconstructor.push(&fragment);
            }
            driver.complete();
            return None;
        }

        let mut events = driver.reconstructor.start();
        loop {
            match driver.upstream.next().await {
                Some(Ok(fragment)) => events.extend(driver.reconstructor.push(&fragment)),
                Some(Err(e)) => {
                    match e {
                        GatewayError::Timeout(_) => METRICS.record_timeout(),
                        _ => METRICS.record_upstream_error(),
                    }
                    events.extend(driver.reconstructor.fail(&e));
                }
                None => {
                    driver.upstream_done = true;
                    events.extend(driver.reconstructor.finish());
                }
            }

            if driver.reconstructor.is_terminal() {
                driver.finished = true;
                break;
            }
            if !events.is_empty() {
                break;
            }
        }

        let payload: String = events.iter().map(StreamEvent::to_sse_string).collect();
        Some((Ok(Bytes::from(payload)), driver))
    })
}
