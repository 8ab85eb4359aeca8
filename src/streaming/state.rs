use std::collections::BTreeMap;

/// Index of the leading text block
pub const TEXT_BLOCK_INDEX: u32 = 0;

/// An Anthropic tool_use block opened for one backend tool index
#[derive(Debug, Clone)]
pub struct ToolBlock {
    /// Anthropic-side content block index
    pub index: u32,
    pub id: String,
    pub name: String,
    /// Argument fragments forwarded so far
    pub arguments: String,
    pub closed: bool,
}

/// Per-stream bookkeeping, owned by exactly one reconstructor
#[derive(Debug, Default)]
pub struct StreamState {
    text: String,
    forwarded: usize,
    text_closed: bool,
    /// Backend tool index -> block
    tools: BTreeMap<u32, ToolBlock>,
    /// Backend key of the most recently opened tool block
    last_opened: Option<u32>,
    next_index: u32,
    late_text: String,
    pub input_tokens: u32,
    pub reported_output_tokens: Option<u32>,
    pub terminal: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            next_index: TEXT_BLOCK_INDEX + 1,
            ..Default::default()
        }
    }

    pub fn tools_started(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn text_closed(&self) -> bool {
        self.text_closed
    }

    /// Buffer text for block 0
    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Text that arrived after tool calls started; kept for the record only
    pub fn push_late_text(&mut self, text: &str) {
        self.late_text.push_str(text);
    }

    /// Buffered text not yet sent to the caller, marked as sent
    pub fn take_unforwarded(&mut self) -> Option<String> {
        if self.forwarded >= self.text.len() {
            return None;
        }
        let pending = self.text[self.forwarded..].to_string();
        self.forwarded = self.text.len();
        Some(pending)
    }

    /// Returns true only on the first call
    pub fn close_text(&mut self) -> bool {
        !std::mem::replace(&mut self.text_closed, true)
    }

    pub fn tool(&mut self, backend_index: u32) -> Option<&mut ToolBlock> {
        self.tools.get_mut(&backend_index)
    }

    /// The most recently opened block, as `(backend key, id)`
    pub fn last_opened(&self) -> Option<(u32, &str)> {
        let key = self.last_opened?;
        self.tools.get(&key).map(|block| (key, block.id.as_str()))
    }

    /// A backend key no block uses yet
    pub fn unused_key(&self) -> u32 {
        self.tools.keys().next_back().map_or(0, |key| key + 1)
    }

    /// Open a block with the next Anthropic index
    pub fn open_tool(&mut self, backend_index: u32, id: String, name: String) -> &mut ToolBlock {
        let index = self.next_index;
        self.next_index += 1;
        self.last_opened = Some(backend_index);
        self.tools.entry(backend_index).or_insert(ToolBlock {
            index,
            id,
            name,
            arguments: String::new(),
            closed: false,
        })
    }

    /// Close every open tool block; returns their indices in ascending order
    pub fn close_tools(&mut self) -> Vec<u32> {
        let mut closed: Vec<u32> = self
            .tools
            .values_mut()
            .filter(|tool| !tool.closed)
            .map(|tool| {
                tool.closed = true;
                tool.index
            })
            .collect();
        closed.sort_unstable();
        closed
    }

    /// All assistant text seen, including text that could not be streamed
    pub fn full_text(&self) -> String {
        format!("{}{}", self.text, self.late_text)
    }

    pub fn tool_blocks(&self) -> impl Iterator<Item = &ToolBlock> {
        self.tools.values()
    }

    /// Reported usage, or one token per four characters of generated content
    pub fn output_tokens(&self) -> u32 {
        if let Some(tokens) = self.reported_output_tokens {
            return tokens;
        }
        let chars = self.text.chars().count()
            + self.late_text.chars().count()
            + self
                .tools
                .values()
                .map(|t| t.arguments.chars().count())
                .sum::<usize>();
        if chars == 0 { 0 } else { (chars / 4).max(1) as u32 }
    }
}
