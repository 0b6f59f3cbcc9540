//! Hierarchical, batched trace shipping for multi-agent LLM pipelines.
//!
//! This crate re-exports the public API of the tracewire workspace:
//!
//! - [`events`]: agent events, payloads, ids and span naming
//! - [`config`]: observability settings from the environment or a file
//! - [`monitor`]: tracers, the span registry and batched delivery
//!
//! Most callers only need the [`prelude`].

pub use tracewire_config as config;
pub use tracewire_core as events;
pub use tracewire_monitor as monitor;

pub mod prelude {
    pub use tracewire_config::{ConfigError, ObservabilityConfig, Provider};
    pub use tracewire_core::{
        AgentEnd, AgentEvent, AgentFailure, AgentStart, ConversationEnd, ConversationStart,
        EventKind, EventPayload, GenerationEnd, GenerationStart, SpanId, ToolCallEnd,
        ToolCallStart, TraceId, UsageMetrics,
    };
    pub use tracewire_monitor::{
        InitError, MetricsSnapshot, NoopTracer, Observability, ObservationKind, ObserveError,
        Tracer,
    };
}
