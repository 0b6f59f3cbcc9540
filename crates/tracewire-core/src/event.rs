//! Inbound agent events and their payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::UsageMetrics;

// ─────────────────────────────────────────────────────────────────────────────
// Event Kind
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of an inbound event, as named on the wire (`agent_start`, ...).
///
/// Kinds this crate does not know are kept verbatim in [`EventKind::Other`]
/// so new producers never break older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    AgentStart,
    AgentEnd,
    AgentError,
    ConversationStart,
    ConversationEnd,
    LlmGenerationStart,
    LlmGenerationEnd,
    ToolCallStart,
    ToolCallEnd,
    TokenUsage,
    McpServerConnectionStart,
    McpServerConnectionEnd,
    McpServerConnectionError,
    McpServerDiscovery,
    McpServerSelection,
    Other(String),
}

impl EventKind {
    /// Every kind with a dedicated handler.
    pub const KNOWN: [EventKind; 15] = [
        EventKind::AgentStart,
        EventKind::AgentEnd,
        EventKind::AgentError,
        EventKind::ConversationStart,
        EventKind::ConversationEnd,
        EventKind::LlmGenerationStart,
        EventKind::LlmGenerationEnd,
        EventKind::ToolCallStart,
        EventKind::ToolCallEnd,
        EventKind::TokenUsage,
        EventKind::McpServerConnectionStart,
        EventKind::McpServerConnectionEnd,
        EventKind::McpServerConnectionError,
        EventKind::McpServerDiscovery,
        EventKind::McpServerSelection,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentStart => "agent_start",
            EventKind::AgentEnd => "agent_end",
            EventKind::AgentError => "agent_error",
            EventKind::ConversationStart => "conversation_start",
            EventKind::ConversationEnd => "conversation_end",
            EventKind::LlmGenerationStart => "llm_generation_start",
            EventKind::LlmGenerationEnd => "llm_generation_end",
            EventKind::ToolCallStart => "tool_call_start",
            EventKind::ToolCallEnd => "tool_call_end",
            EventKind::TokenUsage => "token_usage",
            EventKind::McpServerConnectionStart => "mcp_server_connection_start",
            EventKind::McpServerConnectionEnd => "mcp_server_connection_end",
            EventKind::McpServerConnectionError => "mcp_server_connection_error",
            EventKind::McpServerDiscovery => "mcp_server_discovery",
            EventKind::McpServerSelection => "mcp_server_selection",
            EventKind::Other(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        EventKind::KNOWN
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .unwrap_or_else(|| EventKind::Other(s.to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::parse(s)
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::parse(&s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentStart {
    pub agent_type: String,
    pub model_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub available_tools: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEnd {
    pub agent_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFailure {
    pub error: String,
    pub turn: u32,
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationStart {
    pub question: String,
    pub system_prompt: String,
    pub tools_count: u32,
    pub servers: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationEnd {
    pub question: String,
    pub result: String,
    pub turns: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationStart {
    pub turn: u32,
    pub model_id: String,
    pub temperature: f64,
    pub tools_count: u32,
    pub messages_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationEnd {
    pub turn: u32,
    pub content: String,
    pub tool_calls: u32,
    pub usage: UsageMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallStart {
    pub turn: u32,
    pub tool_name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
    pub server_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallEnd {
    pub turn: u32,
    pub tool_name: String,
    pub result: String,
    pub server_name: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub turn: u32,
    pub operation: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub model_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

/// Shared by the connection start/end/error events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConnection {
    pub server_name: String,
    pub status: String,
    pub tools_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerDiscovery {
    pub total_servers: u32,
    pub connected_servers: u32,
    pub failed_servers: u32,
    pub tool_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerSelection {
    pub turn: u32,
    pub selected_servers: Vec<String>,
    pub total_servers: u32,
    /// Where the selection came from: `preset`, `manual` or `all`.
    pub source: String,
    pub query: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Field names probed, in order, for a human-readable result in map payloads.
const RESULT_FIELDS: [&str; 7] = [
    "result",
    "output",
    "response",
    "answer",
    "final_answer",
    "content",
    "text",
];

/// Payload carried by an [`AgentEvent`].
///
/// Rust producers hand over one of the typed records; producers that only
/// have loosely structured data (JSON bridges, other languages) use
/// [`EventPayload::Map`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    AgentStart(AgentStart),
    AgentEnd(AgentEnd),
    AgentFailure(AgentFailure),
    ConversationStart(ConversationStart),
    ConversationEnd(ConversationEnd),
    GenerationStart(GenerationStart),
    GenerationEnd(GenerationEnd),
    ToolCallStart(ToolCallStart),
    ToolCallEnd(ToolCallEnd),
    TokenUsage(TokenUsage),
    McpServerConnection(McpServerConnection),
    McpServerDiscovery(McpServerDiscovery),
    McpServerSelection(McpServerSelection),
    Map(Map<String, Value>),
    #[default]
    Empty,
}

macro_rules! payload_from {
    ($($record:ident),* $(,)?) => {
        $(
            impl From<$record> for EventPayload {
                fn from(record: $record) -> Self {
                    EventPayload::$record(record)
                }
            }
        )*
    };
}

payload_from!(
    AgentStart,
    AgentEnd,
    AgentFailure,
    ConversationStart,
    ConversationEnd,
    GenerationStart,
    GenerationEnd,
    ToolCallStart,
    ToolCallEnd,
    TokenUsage,
    McpServerConnection,
    McpServerDiscovery,
    McpServerSelection,
);

impl From<Map<String, Value>> for EventPayload {
    fn from(map: Map<String, Value>) -> Self {
        EventPayload::Map(map)
    }
}

impl EventPayload {
    /// Wraps arbitrary JSON. Objects become [`EventPayload::Map`], `null`
    /// becomes [`EventPayload::Empty`], anything else is stored under `value`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => EventPayload::Map(map),
            Value::Null => EventPayload::Empty,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                EventPayload::Map(map)
            }
        }
    }

    /// JSON rendering used as observation input/output.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, EventPayload::Map(_))
    }

    pub fn question(&self) -> Option<&str> {
        let question = match self {
            EventPayload::AgentStart(r) => r.question.as_deref(),
            EventPayload::ConversationStart(r) => Some(r.question.as_str()),
            EventPayload::ConversationEnd(r) => Some(r.question.as_str()),
            EventPayload::Map(map) => str_field(map, "question"),
            _ => None,
        };
        question.filter(|q| !q.trim().is_empty())
    }

    pub fn model_id(&self) -> Option<&str> {
        let model = match self {
            EventPayload::AgentStart(r) => Some(r.model_id.as_str()),
            EventPayload::GenerationStart(r) => Some(r.model_id.as_str()),
            EventPayload::TokenUsage(r) => Some(r.model_id.as_str()),
            EventPayload::Map(map) => str_field(map, "model_id"),
            _ => None,
        };
        model.filter(|m| !m.is_empty())
    }

    /// Human-readable final result, if the payload carries a non-empty one.
    pub fn final_result(&self) -> Option<&str> {
        let result = match self {
            EventPayload::AgentEnd(r) => r.result.as_deref(),
            EventPayload::ConversationEnd(r) => Some(r.result.as_str()),
            EventPayload::GenerationEnd(r) => Some(r.content.as_str()),
            EventPayload::ToolCallEnd(r) => Some(r.result.as_str()),
            EventPayload::Map(map) => map_result(map),
            _ => None,
        };
        result.filter(|r| !r.is_empty())
    }

    pub fn error_message(&self) -> Option<&str> {
        let error = match self {
            EventPayload::AgentEnd(r) => r.error.as_deref(),
            EventPayload::AgentFailure(r) => Some(r.error.as_str()),
            EventPayload::ConversationEnd(r) => r.error.as_deref(),
            EventPayload::McpServerConnection(r) => r.error.as_deref(),
            EventPayload::McpServerDiscovery(r) => r.error.as_deref(),
            EventPayload::Map(map) => str_field(map, "error"),
            _ => None,
        };
        error.filter(|e| !e.is_empty())
    }

    pub fn turn(&self) -> Option<u64> {
        match self {
            EventPayload::AgentFailure(r) => Some(r.turn.into()),
            EventPayload::GenerationStart(r) => Some(r.turn.into()),
            EventPayload::GenerationEnd(r) => Some(r.turn.into()),
            EventPayload::ToolCallStart(r) => Some(r.turn.into()),
            EventPayload::ToolCallEnd(r) => Some(r.turn.into()),
            EventPayload::TokenUsage(r) => Some(r.turn.into()),
            EventPayload::McpServerSelection(r) => Some(r.turn.into()),
            EventPayload::Map(map) => count_field(map, "turn"),
            _ => None,
        }
    }

    /// Tools available to an agent at start.
    pub fn available_tools(&self) -> Option<u64> {
        match self {
            EventPayload::AgentStart(r) => Some(r.available_tools.into()),
            EventPayload::Map(map) => count_field(map, "available_tools"),
            _ => None,
        }
    }

    /// Tools offered to the model for one conversation or generation.
    pub fn tools_count(&self) -> Option<u64> {
        match self {
            EventPayload::ConversationStart(r) => Some(r.tools_count.into()),
            EventPayload::GenerationStart(r) => Some(r.tools_count.into()),
            EventPayload::McpServerConnection(r) => Some(r.tools_count.into()),
            EventPayload::Map(map) => count_field(map, "tools_count"),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        let name = match self {
            EventPayload::ToolCallStart(r) => Some(r.tool_name.as_str()),
            EventPayload::ToolCallEnd(r) => Some(r.tool_name.as_str()),
            EventPayload::Map(map) => str_field(map, "tool_name"),
            _ => None,
        };
        name.filter(|n| !n.is_empty())
    }

    pub fn server_name(&self) -> Option<&str> {
        let name = match self {
            EventPayload::ToolCallStart(r) => Some(r.server_name.as_str()),
            EventPayload::ToolCallEnd(r) => Some(r.server_name.as_str()),
            EventPayload::McpServerConnection(r) => Some(r.server_name.as_str()),
            EventPayload::Map(map) => str_field(map, "server_name"),
            _ => None,
        };
        name.filter(|n| !n.is_empty())
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Counts arrive as integers from Rust producers and as floats from some
/// JSON bridges; both are accepted.
fn count_field(map: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = map.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn map_result(map: &Map<String, Value>) -> Option<&str> {
    RESULT_FIELDS
        .iter()
        .filter_map(|field| str_field(map, field))
        .find(|value| !value.is_empty())
        .or_else(|| {
            map.get("result")
                .and_then(Value::as_object)
                .and_then(|nested| str_field(nested, "text"))
                .filter(|text| !text.is_empty())
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// An event emitted by the orchestration layer.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub kind: EventKind,
    pub trace_id: String,
    /// Links start/end pairs emitted by the same producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn new(
        kind: impl Into<EventKind>,
        trace_id: impl Into<String>,
        payload: impl Into<EventPayload>,
    ) -> Self {
        Self {
            kind: kind.into(),
            trace_id: trace_id.into(),
            correlation_id: None,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
