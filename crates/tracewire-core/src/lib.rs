//! Core domain types shared across tracewire.
//!
//! This crate provides the vocabulary the orchestration layer speaks when it
//! reports what its agents are doing:
//!
//! - [`AgentEvent`] and [`EventKind`]: the inbound event envelope
//! - [`EventPayload`]: a closed set of typed payload records plus a map fallback
//! - [`TraceId`] and [`SpanId`]: identifiers handed back by tracers
//! - [`naming`]: descriptive trace and span names derived from payloads
//!
//! # Example
//!
//! ```rust
//! use tracewire_core::{AgentEvent, AgentStart, EventKind, EventPayload};
//!
//! let event = AgentEvent::new(
//!     EventKind::AgentStart,
//!     "trace-1",
//!     EventPayload::from(AgentStart {
//!         model_id: "openai/gpt-4.1".to_string(),
//!         question: Some("What is 2+2?".to_string()),
//!         ..Default::default()
//!     }),
//! );
//!
//! assert_eq!(event.kind.as_str(), "agent_start");
//! assert_eq!(event.payload.question(), Some("What is 2+2?"));
//! ```

mod event;
pub mod naming;

pub use event::{
    AgentEnd, AgentEvent, AgentFailure, AgentStart, ConversationEnd, ConversationStart,
    EventKind, EventPayload, GenerationEnd, GenerationStart, McpServerConnection,
    McpServerDiscovery, McpServerSelection, TokenUsage, ToolCallEnd, ToolCallStart,
};

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier (32 lowercase hex chars).
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

id_type!(
    /// Identifier of a trace: one end-to-end agent invocation.
    TraceId
);

id_type!(
    /// Identifier of an observation (span, generation, agent or tool node).
    SpanId
);

// ─────────────────────────────────────────────────────────────────────────────
// Usage
// ─────────────────────────────────────────────────────────────────────────────

/// Token counters reported for an LLM generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageMetrics {
    #[serde(alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(alias = "completion_tokens")]
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Unit the counters are expressed in, e.g. `TOKENS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl UsageMetrics {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            unit: None,
        }
    }

    /// True when no counter carries information.
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }
}
