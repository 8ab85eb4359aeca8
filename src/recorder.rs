//! Debug log and conversation history.
//!
//! Request handlers never touch the stores directly: they push events into an
//! unbounded channel through an [`EventSink`] and a background task applies
//! them. Recording can therefore never stall or fail a request.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Entries kept in the debug ring
pub const DEBUG_LOG_CAPACITY: usize = 50;

pub const CONVERSATION_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Request,
    Response,
    Error,
    Config,
}

impl LogCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "error" => Some(Self::Error),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub id: u64,
    /// Unix seconds
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub timestamp: u64,
    pub role: String,
    pub content: String,
    /// Qualified backend model that produced or received the turn
    pub model: String,
}

#[derive(Debug)]
pub enum GatewayEvent {
    Debug(DebugEntry),
    Turn(ConversationTurn),
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Bounded ring of recent debug entries, oldest evicted first
#[derive(Debug, Default)]
pub struct DebugLog {
    entries: RwLock<VecDeque<DebugEntry>>,
}

impl DebugLog {
    pub fn push(&self, entry: DebugEntry) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() == DEBUG_LOG_CAPACITY {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Most recent entries last, optionally filtered and limited to the newest `limit`
    pub fn list(&self, category: Option<LogCategory>, limit: Option<usize>) -> Vec<DebugEntry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let matching: Vec<DebugEntry> = entries
            .iter()
            .filter(|e| category.is_none_or(|c| e.category == c))
            .cloned()
            .collect();
        tail(matching, limit)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: RwLock<VecDeque<ConversationTurn>>,
}

impl ConversationHistory {
    pub fn push(&self, turn: ConversationTurn) {
        if let Ok(mut turns) = self.turns.write() {
            if turns.len() == CONVERSATION_CAPACITY {
                turns.pop_front();
            }
            turns.push_back(turn);
        }
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<ConversationTurn> {
        let turns = self
            .turns
            .read()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        tail(turns, limit)
    }

    pub fn len(&self) -> usize {
        self.turns.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut turns) = self.turns.write() {
            turns.clear();
        }
    }
}

fn tail<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit
        && items.len() > limit
    {
        items.drain(..items.len() - limit);
    }
    items
}

/// Both stores, shared between the recorder task and the admin endpoints
#[derive(Debug, Default)]
pub struct RecordStores {
    pub debug_log: DebugLog,
    pub conversation: ConversationHistory,
}

impl RecordStores {
    pub fn apply(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Debug(entry) => self.debug_log.push(entry),
            GatewayEvent::Turn(turn) => self.conversation.push(turn),
        }
    }
}

/// Fire-and-forget handle for recording events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    next_id: Arc<AtomicU64>,
}

impl EventSink {
    pub fn record(&self, category: LogCategory, message: impl Into<String>, detail: Option<Value>) {
        let entry = DebugEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: unix_now(),
            category,
            message: message.into(),
            detail,
        };
        self.send(GatewayEvent::Debug(entry));
    }

    /// Blank turns are skipped
    pub fn record_turn(&self, role: &str, content: impl Into<String>, model: impl Into<String>) {
        let content = content.into();
        if content.trim().is_empty() {
            return;
        }
        self.send(GatewayEvent::Turn(ConversationTurn {
            timestamp: unix_now(),
            role: role.to_string(),
            content,
            model: model.into(),
        }));
    }

    fn send(&self, event: GatewayEvent) {
        // the recorder only stops at shutdown
        if self.tx.send(event).is_err() {
            debug!("Recorder stopped; dropping event");
        }
    }
}

pub struct Recorder;

impl Recorder {
    /// Spawn the task that applies events to `stores`; it ends when every sink is dropped
    pub fn spawn(stores: Arc<RecordStores>) -> (EventSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                stores.apply(event);
            }
        });
        let sink = EventSink {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (sink, handle)
    }
}
