//! Trace and observation records, and the ingestion envelope they ship in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracewire_core::UsageMetrics;

fn is_null(value: &Value) -> bool {
    value.is_null()
}

// ─────────────────────────────────────────────────────────────────────────────
// Trace
// ─────────────────────────────────────────────────────────────────────────────

/// One end-to-end agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_null")]
    pub input: Value,
    /// Backfilled by completion events or set by `end_trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
            metadata: Map::new(),
            user_id: None,
            session_id: None,
            tags: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// True while no meaningful output has been recorded.
    pub fn output_is_empty(&self) -> bool {
        match &self.output {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationKind {
    Span,
    Generation,
    Agent,
    Tool,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Span => "SPAN",
            ObservationKind::Generation => "GENERATION",
            ObservationKind::Agent => "AGENT",
            ObservationKind::Tool => "TOOL",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "GENERATION" => ObservationKind::Generation,
            "AGENT" => ObservationKind::Agent,
            "TOOL" => ObservationKind::Tool,
            _ => ObservationKind::Span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationLevel {
    #[default]
    Default,
    Error,
}

/// Token usage in the backend's shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl From<&UsageMetrics> for Usage {
    fn from(metrics: &UsageMetrics) -> Self {
        Self {
            input: metrics.input_tokens,
            output: metrics.output_tokens,
            total: metrics.total_tokens,
            unit: metrics.unit.clone(),
        }
    }
}

/// One node of a trace's execution tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    #[serde(default, skip_serializing_if = "is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub level: ObservationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Observation {
    /// A fresh, open observation. Trace and parent are assigned by the registry.
    pub fn new(kind: ObservationKind, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            trace_id: String::new(),
            parent_observation_id: None,
            name: name.into(),
            kind,
            input,
            output: Value::Null,
            metadata: Map::new(),
            start_time: Utc::now(),
            end_time: None,
            level: ObservationLevel::Default,
            status_message: None,
            model: None,
            usage: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Stamps the end time, level and status message.
    pub fn finish(&mut self, error: Option<&str>) {
        self.end_time = Some(Utc::now());
        match error {
            Some(message) => {
                self.level = ObservationLevel::Error;
                self.status_message = Some(message.to_string());
            }
            None => self.level = ObservationLevel::Default,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestionKind {
    TraceCreate,
    ObservationCreate,
    SpanUpdate,
    GenerationCreate,
    GenerationUpdate,
}

impl IngestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionKind::TraceCreate => "trace-create",
            IngestionKind::ObservationCreate => "observation-create",
            IngestionKind::SpanUpdate => "span-update",
            IngestionKind::GenerationCreate => "generation-create",
            IngestionKind::GenerationUpdate => "generation-update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestionBody {
    Observation(Observation),
    Trace(TraceRecord),
}

/// A single delivery event: a snapshot of a trace or observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IngestionKind,
    pub timestamp: DateTime<Utc>,
    pub body: IngestionBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl IngestionEvent {
    pub fn trace(trace: TraceRecord) -> Self {
        Self::new(IngestionKind::TraceCreate, IngestionBody::Trace(trace))
    }

    pub fn observation(kind: IngestionKind, observation: Observation) -> Self {
        Self::new(kind, IngestionBody::Observation(observation))
    }

    fn new(kind: IngestionKind, body: IngestionBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind,
            timestamp: Utc::now(),
            body,
            metadata: None,
        }
    }

    /// Id of the trace or observation carried in the body.
    pub fn body_id(&self) -> &str {
        match &self.body {
            IngestionBody::Trace(trace) => &trace.id,
            IngestionBody::Observation(observation) => &observation.id,
        }
    }
}

/// Request body of the ingestion endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestionBatch<T> {
    pub batch: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observation_wire_shape() {
        let mut observation = Observation::new(ObservationKind::Tool, "tool_fs_read_turn_1", json!({"path": "/tmp"}));
        observation.trace_id = "T1".to_string();
        observation.parent_observation_id = Some("gen-1".to_string());
        observation.finish(Some("boom"));

        let value = serde_json::to_value(&observation).unwrap();
        assert_eq!(value["type"], "TOOL");
        assert_eq!(value["traceId"], "T1");
        assert_eq!(value["parentObservationId"], "gen-1");
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["statusMessage"], "boom");
        assert!(value.get("endTime").is_some());
        assert!(value.get("output").is_none());
    }

    #[test]
    fn test_ingestion_event_wire_shape() {
        let event = IngestionEvent::trace(TraceRecord::new("T1", "query_hi", json!({"question": "hi"})));
        let value = serde_json::to_value(IngestionBatch { batch: [&event] }).unwrap();

        assert_eq!(value["batch"][0]["type"], "trace-create");
        assert_eq!(value["batch"][0]["body"]["id"], "T1");
        assert!(value["batch"][0].get("metadata").is_none());
        assert_eq!(event.body_id(), "T1");
    }

    #[test]
    fn test_output_is_empty() {
        let mut trace = TraceRecord::new("T1", "t", Value::Null);
        assert!(trace.output_is_empty());
        trace.output = Some(json!(""));
        assert!(trace.output_is_empty());
        trace.output = Some(json!("4"));
        assert!(!trace.output_is_empty());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ObservationKind::Span,
            ObservationKind::Generation,
            ObservationKind::Agent,
            ObservationKind::Tool,
        ] {
            assert_eq!(ObservationKind::from_str(kind.as_str()), kind);
        }
    }
}
