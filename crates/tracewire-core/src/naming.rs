//! Descriptive trace and span names derived from event payloads.
//!
//! Names are what a human scans in the tracing UI, so they carry the query
//! text, model and tool counts rather than bare event kinds.

use crate::EventPayload;

pub const DEFAULT_TRACE_NAME: &str = "agent_conversation";
pub const DEFAULT_AGENT_SPAN_NAME: &str = "agent_execution";
pub const DEFAULT_CONVERSATION_SPAN_NAME: &str = "conversation_execution";
pub const DEFAULT_GENERATION_SPAN_NAME: &str = "llm_generation";
pub const DEFAULT_TOOL_SPAN_NAME: &str = "tool_execution";

const UNKNOWN: &str = "unknown";

/// `query_<slug>` from the question, or [`DEFAULT_TRACE_NAME`].
pub fn trace_name(payload: &EventPayload) -> String {
    payload
        .question()
        .map(|q| format!("query_{}", slugify(q, 80, 50)))
        .unwrap_or_else(|| DEFAULT_TRACE_NAME.to_string())
}

/// `agent_<short-model>_<n>_tools`, or [`DEFAULT_AGENT_SPAN_NAME`].
pub fn agent_span_name(payload: &EventPayload) -> String {
    match payload {
        EventPayload::AgentStart(_) | EventPayload::Map(_) => format!(
            "agent_{}_{}_tools",
            short_model(payload.model_id()),
            payload.available_tools().unwrap_or(0)
        ),
        _ => DEFAULT_AGENT_SPAN_NAME.to_string(),
    }
}

/// `conversation_<slug>`, or [`DEFAULT_CONVERSATION_SPAN_NAME`].
pub fn conversation_span_name(payload: &EventPayload) -> String {
    payload
        .question()
        .map(|q| format!("conversation_{}", slugify(q, 50, 30)))
        .unwrap_or_else(|| DEFAULT_CONVERSATION_SPAN_NAME.to_string())
}

/// `llm_generation_turn_<turn>_<short-model>_<n>_tools`, or
/// [`DEFAULT_GENERATION_SPAN_NAME`].
pub fn generation_span_name(payload: &EventPayload) -> String {
    match payload {
        EventPayload::GenerationStart(_) | EventPayload::Map(_) => format!(
            "llm_generation_turn_{}_{}_{}_tools",
            payload.turn().unwrap_or(0),
            short_model(payload.model_id()),
            payload.tools_count().unwrap_or(0)
        ),
        _ => DEFAULT_GENERATION_SPAN_NAME.to_string(),
    }
}

/// `tool_<server>_<tool>_turn_<turn>`, or [`DEFAULT_TOOL_SPAN_NAME`].
pub fn tool_span_name(payload: &EventPayload) -> String {
    match payload {
        EventPayload::ToolCallStart(_) | EventPayload::ToolCallEnd(_) | EventPayload::Map(_) => {
            format!(
                "tool_{}_{}_turn_{}",
                payload.server_name().unwrap_or(UNKNOWN),
                payload.tool_name().unwrap_or(UNKNOWN),
                payload.turn().unwrap_or(0)
            )
        }
        _ => DEFAULT_TOOL_SPAN_NAME.to_string(),
    }
}

/// Text after the last `/` of a model id (`openai/gpt-4.1` -> `gpt-4.1`).
pub fn short_model(model_id: Option<&str>) -> &str {
    model_id
        .and_then(|m| m.rsplit('/').next())
        .filter(|m| !m.is_empty())
        .unwrap_or(UNKNOWN)
}

/// Lower-cases, strips `?!.,;:`, joins words with `_` and truncates to
/// `max` chars. Truncation cuts at the last `_` when it lies past `min_cut`,
/// otherwise keeps `max - 3` chars and appends `...`.
pub fn slugify(text: &str, max: usize, min_cut: usize) -> String {
    let cleaned: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '?' | '!' | '.' | ',' | ';' | ':'))
        .collect();
    let slug = cleaned.split_whitespace().collect::<Vec<_>>().join("_");

    let chars: Vec<char> = slug.chars().collect();
    if chars.len() <= max {
        return slug;
    }

    let head = &chars[..max];
    match head.iter().rposition(|c| *c == '_') {
        Some(cut) if cut > min_cut => head[..cut].iter().collect(),
        _ => {
            let mut truncated: String = chars[..max - 3].iter().collect();
            truncated.push_str("...");
            truncated
        }
    }
}
