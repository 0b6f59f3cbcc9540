//! Hierarchical tracing for multi-agent LLM pipelines.
//!
//! Agents report what they do through a [`Tracer`]. The [`IngestionTracer`]
//! reconstructs the execution tree (agent, conversation turn, generation,
//! tool call) from a flat event stream, and ships trace and observation
//! snapshots in batches to an ingestion backend without ever blocking or
//! failing the caller. [`NoopTracer`] satisfies the same contract and is
//! used whenever tracing is disabled or unhealthy.
//!
//! # Example
//!
//! ```rust,no_run
//! use tracewire_config::ObservabilityConfig;
//! use tracewire_core::{AgentEvent, EventKind, EventPayload};
//! use tracewire_monitor::Observability;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let observability = Observability::new(ObservabilityConfig::from_env());
//! let tracer = observability.tracer().await;
//!
//! tracer.emit_event(&AgentEvent::new(
//!     EventKind::AgentStart,
//!     "trace-1",
//!     EventPayload::from_value(serde_json::json!({"question": "What is 2+2?"})),
//! ))?;
//!
//! tracer.flush().await;
//! observability.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod exporter;
mod lifecycle;
mod metrics;
mod queue;
mod registry;
mod shipper;
mod trace;
mod tracer;

pub use exporter::{classify_response, BatchExporter, ExportError, IngestionClient, HEALTH_PATH, INGESTION_PATH};
pub use lifecycle::{InitError, Observability};
pub use metrics::{DeliveryMetrics, MetricsSnapshot};
pub use queue::DeliveryQueue;
pub use registry::{EndOutcome, HierarchyLevel, Placement, Registry};
pub use shipper::{ShipperConfig, ShipperHandle};
pub use trace::{
    IngestionBatch, IngestionBody, IngestionEvent, IngestionKind, Observation, ObservationKind,
    ObservationLevel, TraceRecord, Usage,
};
pub use tracer::{IngestionTracer, NoopTracer, ObserveError, Tracer, TracerSettings};
