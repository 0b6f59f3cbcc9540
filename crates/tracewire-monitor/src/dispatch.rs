//! Maps orchestration events onto the span tree.
//!
//! Start events open observations parented at the current span one level up
//! (falling back to the trace itself); end events mint short-lived
//! `<kind>_completion` markers under the trace instead of closing the span
//! opened earlier.

use crate::registry::HierarchyLevel;
use crate::trace::{IngestionEvent, ObservationKind, TraceRecord};
use crate::tracer::{IngestionTracer, ObserveError, Tracer};
use serde_json::{Map, Value};
use tracewire_core::{naming, AgentEvent, EventKind};

const DEFAULT_AGENT_ERROR: &str = "agent error";

impl IngestionTracer {
    pub(crate) fn dispatch(&self, event: &AgentEvent) -> Result<(), ObserveError> {
        if event.trace_id.trim().is_empty() {
            tracing::warn!(kind = %event.kind, "event without trace id ignored");
            return Ok(());
        }

        match &event.kind {
            EventKind::AgentStart => self.on_agent_start(event),
            EventKind::AgentEnd | EventKind::ConversationEnd => self.on_completion(event, true),
            EventKind::LlmGenerationEnd | EventKind::ToolCallEnd => self.on_completion(event, false),
            EventKind::AgentError => self.on_agent_error(event),
            EventKind::ConversationStart => self.on_conversation_start(event),
            EventKind::LlmGenerationStart => self.on_generation_start(event),
            EventKind::ToolCallStart => self.on_tool_call_start(event),
            EventKind::TokenUsage
            | EventKind::McpServerConnectionStart
            | EventKind::McpServerConnectionEnd
            | EventKind::McpServerDiscovery
            | EventKind::McpServerSelection => self.on_marker(event, None),
            EventKind::McpServerConnectionError => {
                self.on_marker(event, event.payload.error_message())
            }
            EventKind::Other(kind) => {
                tracing::warn!(kind = %kind, trace_id = %event.trace_id, "unhandled event kind ignored");
            }
        }
        Ok(())
    }

    fn on_agent_start(&self, event: &AgentEvent) {
        let trace_id = event.trace_id.as_str();
        let input = event.payload.to_value();

        let mut trace = TraceRecord::new(trace_id, naming::trace_name(&event.payload), input.clone());
        trace.metadata = event_metadata(event);
        if !self.open_trace(trace) {
            tracing::debug!(trace_id = %trace_id, "trace already open, adding agent span");
        }

        let span = self.start_observation(
            trace_id,
            ObservationKind::Agent,
            &naming::agent_span_name(&event.payload),
            input,
        );
        self.registry
            .set_current(trace_id, HierarchyLevel::Agent, span.as_str());
        tracing::debug!(trace_id = %trace_id, span_id = %span, "agent span opened");
    }

    fn on_conversation_start(&self, event: &AgentEvent) {
        let trace_id = event.trace_id.as_str();
        let parent = self.parent_for(event, HierarchyLevel::Agent);

        let span = self.start_observation(
            &parent,
            ObservationKind::Span,
            &naming::conversation_span_name(&event.payload),
            event.payload.to_value(),
        );
        self.registry
            .set_current(trace_id, HierarchyLevel::Conversation, span.as_str());
    }

    fn on_generation_start(&self, event: &AgentEvent) {
        let trace_id = event.trace_id.as_str();
        let parent = self.registry.current(trace_id, HierarchyLevel::Conversation);
        if parent.is_none() {
            self.note_fallback(event, HierarchyLevel::Conversation);
        }

        let span = self.create_generation_span(
            trace_id,
            parent.as_deref(),
            &naming::generation_span_name(&event.payload),
            event.payload.model_id().unwrap_or_default(),
            event.payload.to_value(),
        );
        self.registry
            .set_current(trace_id, HierarchyLevel::Generation, span.as_str());
    }

    fn on_tool_call_start(&self, event: &AgentEvent) {
        let parent = self.parent_for(event, HierarchyLevel::Generation);
        self.start_observation(
            &parent,
            ObservationKind::Tool,
            &naming::tool_span_name(&event.payload),
            event.payload.to_value(),
        );
    }

    /// `<kind>_completion` marker under the trace. Agent and conversation
    /// ends also backfill the trace output, first writer wins.
    fn on_completion(&self, event: &AgentEvent, backfill: bool) {
        let trace_id = event.trace_id.as_str();
        let kind = event.kind.as_str();
        let name = format!("{}_completion", kind.trim_end_matches("_end"));
        let payload = event.payload.to_value();
        self.mark(trace_id, &name, payload.clone(), payload, None);

        if !backfill {
            return;
        }
        let Some(result) = event.payload.final_result() else {
            return;
        };
        match self.registry.backfill_trace_output(trace_id, result) {
            Some(trace) => {
                tracing::debug!(trace_id = %trace_id, kind, "trace output backfilled");
                self.enqueue(IngestionEvent::trace(trace));
            }
            None => {
                tracing::debug!(trace_id = %trace_id, kind, "trace output already set or trace unknown");
            }
        }
    }

    fn on_agent_error(&self, event: &AgentEvent) {
        let message = event
            .payload
            .error_message()
            .unwrap_or(DEFAULT_AGENT_ERROR);
        let payload = event.payload.to_value();
        self.mark(
            &event.trace_id,
            EventKind::AgentError.as_str(),
            payload.clone(),
            payload,
            Some(message),
        );
    }

    /// Point-in-time span named after the event kind.
    fn on_marker(&self, event: &AgentEvent, error: Option<&str>) {
        let payload = event.payload.to_value();
        self.mark(&event.trace_id, event.kind.as_str(), payload.clone(), payload, error);
    }

    /// Current span one level up, or the trace id when none is recorded.
    fn parent_for(&self, event: &AgentEvent, level: HierarchyLevel) -> String {
        match self.registry.current(&event.trace_id, level) {
            Some(span_id) => span_id,
            None => {
                self.note_fallback(event, level);
                event.trace_id.clone()
            }
        }
    }

    fn note_fallback(&self, event: &AgentEvent, level: HierarchyLevel) {
        self.metrics.record_parent_fallback();
        tracing::warn!(
            trace_id = %event.trace_id,
            kind = %event.kind,
            missing = level.as_str(),
            "no current parent span, attaching to trace"
        );
    }
}

fn event_metadata(event: &AgentEvent) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("event_kind".to_string(), Value::from(event.kind.as_str()));
    if let Some(correlation_id) = &event.correlation_id {
        metadata.insert("correlation_id".to_string(), Value::from(correlation_id.as_str()));
    }
    metadata
}
