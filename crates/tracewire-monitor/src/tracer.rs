//! The tracer contract and its two implementations.

use crate::exporter::BatchExporter;
use crate::metrics::{DeliveryMetrics, MetricsSnapshot};
use crate::queue::DeliveryQueue;
use crate::registry::{EndOutcome, Placement, Registry};
use crate::shipper::{ShipperConfig, ShipperHandle};
use crate::trace::{IngestionEvent, IngestionKind, Observation, ObservationKind, TraceRecord, Usage};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracewire_config::ObservabilityConfig;
use tracewire_core::{AgentEvent, SpanId, TraceId, UsageMetrics};

const FLUSH_POLL: Duration = Duration::from_millis(100);

/// Error slot of [`Tracer::emit_event`]. Current handlers always succeed.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error("Failed to dispatch {kind} event: {message}")]
    Dispatch { kind: String, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracer Trait
// ─────────────────────────────────────────────────────────────────────────────

/// What agents and the orchestration layer depend on.
///
/// Every method is safe under concurrent callers and none of them fails the
/// caller: faults are logged and counted. Only `flush` and `shutdown` wait.
#[async_trait]
pub trait Tracer: Send + Sync {
    /// Short provider name (`langfuse`, `noop`).
    fn provider(&self) -> &'static str;

    fn start_trace(&self, name: &str, input: Value) -> TraceId;

    /// A `SPAN` observation. See [`Tracer::start_observation`].
    fn start_span(&self, parent_id: &str, name: &str, input: Value) -> SpanId {
        self.start_observation(parent_id, ObservationKind::Span, name, input)
    }

    /// Opens an observation. A `parent_id` naming a known observation makes
    /// it the parent (and its trace is inherited); otherwise `parent_id` is
    /// the trace id of a root observation.
    fn start_observation(
        &self,
        parent_id: &str,
        kind: ObservationKind,
        name: &str,
        input: Value,
    ) -> SpanId;

    fn create_generation_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        name: &str,
        model: &str,
        input: Value,
    ) -> SpanId;

    /// Closes an observation. Level is ERROR iff `error` is set.
    fn end_span(&self, span_id: &str, output: Value, error: Option<&str>);

    fn end_generation_span(
        &self,
        span_id: &str,
        metadata: Map<String, Value>,
        usage: UsageMetrics,
        error: Option<&str>,
    );

    fn end_trace(&self, trace_id: &str, output: Value);

    /// Single entry point for orchestration events. Never blocks.
    fn emit_event(&self, event: &AgentEvent) -> Result<(), ObserveError>;

    /// Waits, bounded, until everything enqueued so far has been attempted.
    async fn flush(&self);

    /// Stops delivery after shipping what is queued.
    async fn shutdown(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Noop Tracer
// ─────────────────────────────────────────────────────────────────────────────

/// Satisfies the contract without recording anything. Ids are still
/// generated so callers can correlate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl NoopTracer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tracer for NoopTracer {
    fn provider(&self) -> &'static str {
        "noop"
    }

    fn start_trace(&self, _name: &str, _input: Value) -> TraceId {
        TraceId::generate()
    }

    fn start_observation(
        &self,
        _parent_id: &str,
        _kind: ObservationKind,
        _name: &str,
        _input: Value,
    ) -> SpanId {
        SpanId::generate()
    }

    fn create_generation_span(
        &self,
        _trace_id: &str,
        _parent_span_id: Option<&str>,
        _name: &str,
        _model: &str,
        _input: Value,
    ) -> SpanId {
        SpanId::generate()
    }

    fn end_span(&self, _span_id: &str, _output: Value, _error: Option<&str>) {}

    fn end_generation_span(
        &self,
        _span_id: &str,
        _metadata: Map<String, Value>,
        _usage: UsageMetrics,
        _error: Option<&str>,
    ) {
    }

    fn end_trace(&self, _trace_id: &str, _output: Value) {}

    fn emit_event(&self, _event: &AgentEvent) -> Result<(), ObserveError> {
        Ok(())
    }

    async fn flush(&self) {}

    async fn shutdown(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion Tracer
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery tuning for an [`IngestionTracer`].
#[derive(Debug, Clone, Copy)]
pub struct TracerSettings {
    pub queue_capacity: usize,
    pub shipper: ShipperConfig,
    pub flush_timeout: Duration,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self::from(&ObservabilityConfig::default())
    }
}

impl From<&ObservabilityConfig> for TracerSettings {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            shipper: ShipperConfig {
                batch_size: config.batch_size,
                flush_interval: config.flush_interval(),
            },
            flush_timeout: config.flush_timeout(),
        }
    }
}

/// Records the span tree in a [`Registry`] and ships snapshots through a
/// bounded queue to a [`BatchExporter`].
///
/// Created unstarted: events queue up until [`IngestionTracer::start`]
/// spawns the shipper.
pub struct IngestionTracer {
    pub(crate) registry: Registry,
    queue: DeliveryQueue,
    receiver: Mutex<Option<mpsc::Receiver<IngestionEvent>>>,
    exporter: Arc<dyn BatchExporter>,
    shipper: Mutex<Option<Arc<ShipperHandle>>>,
    settings: TracerSettings,
    pub(crate) metrics: Arc<DeliveryMetrics>,
}

impl IngestionTracer {
    pub fn new(exporter: Arc<dyn BatchExporter>, settings: TracerSettings) -> Self {
        let metrics = Arc::new(DeliveryMetrics::new());
        let (queue, receiver) = DeliveryQueue::bounded(settings.queue_capacity, metrics.clone());
        Self {
            registry: Registry::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
            exporter,
            shipper: Mutex::new(None),
            settings,
            metrics,
        }
    }

    /// Spawns the shipper on the current Tokio runtime. Returns false if it
    /// was already started or no runtime is available.
    pub fn start(&self) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no tokio runtime, shipper not started");
            return false;
        }
        let Ok(mut receiver) = self.receiver.lock() else {
            tracing::warn!("tracer receiver lock poisoned, shipper not started");
            return false;
        };
        let Some(rx) = receiver.take() else {
            return false;
        };
        let handle = ShipperHandle::spawn(
            rx,
            self.exporter.clone(),
            self.settings.shipper,
            self.metrics.clone(),
        );
        if let Ok(mut shipper) = self.shipper.lock() {
            *shipper = Some(Arc::new(handle));
        }
        tracing::info!(exporter = self.exporter.name(), "tracer started");
        true
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Events waiting in the delivery queue.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Takes everything queued while the shipper is not running.
    #[cfg(test)]
    pub(crate) fn drain_queued(&self) -> Vec<IngestionEvent> {
        let mut receiver = self.receiver.lock().unwrap();
        let rx = receiver.as_mut().expect("shipper already started");
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn shipper(&self) -> Option<Arc<ShipperHandle>> {
        self.shipper.lock().ok().and_then(|s| s.clone())
    }

    pub(crate) fn enqueue(&self, event: IngestionEvent) -> bool {
        self.queue.push(event)
    }

    /// Registers a trace and enqueues its snapshot. Returns false when the
    /// trace was already open.
    pub(crate) fn open_trace(&self, trace: TraceRecord) -> bool {
        match self.registry.insert_trace(trace) {
            Some(trace) => {
                self.enqueue(IngestionEvent::trace(trace));
                true
            }
            None => false,
        }
    }

    /// Opens and immediately closes a marker span.
    pub(crate) fn mark(&self, parent_id: &str, name: &str, input: Value, output: Value, error: Option<&str>) -> SpanId {
        let span_id = self.start_span(parent_id, name, input);
        self.end_span(span_id.as_str(), output, error);
        span_id
    }

    fn finish_observation<F>(&self, span_id: &str, kind: IngestionKind, finish: F)
    where
        F: FnOnce(&mut Observation),
    {
        match self.registry.end_observation(span_id, finish) {
            EndOutcome::Ended(observation) => {
                let kind = match (kind, observation.kind) {
                    (IngestionKind::SpanUpdate, ObservationKind::Generation) => {
                        IngestionKind::GenerationUpdate
                    }
                    (kind, _) => kind,
                };
                self.enqueue(IngestionEvent::observation(kind, observation));
            }
            EndOutcome::Unknown => {
                self.metrics.record_unknown_end();
                tracing::warn!(span_id = %span_id, "end for unknown observation ignored");
            }
            EndOutcome::AlreadyEnded => {
                self.metrics.record_duplicate_end();
                tracing::warn!(span_id = %span_id, "observation already ended, end ignored");
            }
        }
    }
}

#[async_trait]
impl Tracer for IngestionTracer {
    fn provider(&self) -> &'static str {
        "langfuse"
    }

    fn start_trace(&self, name: &str, input: Value) -> TraceId {
        let id = TraceId::generate();
        self.open_trace(TraceRecord::new(id.as_str(), name, input));
        id
    }

    fn start_observation(
        &self,
        parent_id: &str,
        kind: ObservationKind,
        name: &str,
        input: Value,
    ) -> SpanId {
        let observation = Observation::new(kind, name, input);
        let id = SpanId::from(observation.id.clone());
        if let Some((observation, _)) = self.registry.insert_observation(parent_id, observation) {
            self.enqueue(IngestionEvent::observation(IngestionKind::ObservationCreate, observation));
        }
        id
    }

    fn create_generation_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        name: &str,
        model: &str,
        input: Value,
    ) -> SpanId {
        let mut observation = Observation::new(ObservationKind::Generation, name, input);
        observation.model = Some(model.to_string()).filter(|m| !m.is_empty());
        let id = SpanId::from(observation.id.clone());

        let Some((observation, placement)) =
            self.registry.insert_in_trace(trace_id, parent_span_id, observation)
        else {
            return id;
        };
        if let (Some(parent), Placement::Root) = (parent_span_id, &placement) {
            self.metrics.record_parent_fallback();
            tracing::warn!(
                trace_id = %trace_id,
                parent_span_id = %parent,
                "unknown parent for generation, rooting it under the trace"
            );
        }
        self.enqueue(IngestionEvent::observation(IngestionKind::GenerationCreate, observation));
        id
    }

    fn end_span(&self, span_id: &str, output: Value, error: Option<&str>) {
        self.finish_observation(span_id, IngestionKind::SpanUpdate, |observation| {
            observation.output = output;
            observation.finish(error);
        });
    }

    fn end_generation_span(
        &self,
        span_id: &str,
        metadata: Map<String, Value>,
        usage: UsageMetrics,
        error: Option<&str>,
    ) {
        self.finish_observation(span_id, IngestionKind::GenerationUpdate, |observation| {
            observation.metadata.extend(metadata);
            if !usage.is_empty() {
                observation.usage = Some(Usage::from(&usage));
            }
            observation.finish(error);
        });
    }

    fn end_trace(&self, trace_id: &str, output: Value) {
        match self.registry.end_trace(trace_id, output) {
            Some(trace) => {
                self.enqueue(IngestionEvent::trace(trace));
            }
            None => {
                self.metrics.record_unknown_end();
                tracing::warn!(trace_id = %trace_id, "end for unknown trace ignored");
            }
        }
    }

    fn emit_event(&self, event: &AgentEvent) -> Result<(), ObserveError> {
        self.dispatch(event)
    }

    async fn flush(&self) {
        let Some(shipper) = self.shipper() else {
            tracing::debug!(queued = self.queued_len(), "flush skipped, shipper not started");
            return;
        };

        let deadline = tokio::time::Instant::now() + self.settings.flush_timeout;
        loop {
            shipper.nudge();
            tokio::time::sleep(FLUSH_POLL).await;

            let drained = self.queue.is_empty()
                && shipper.buffered() == 0
                && self.metrics.snapshot().pending() == 0;
            if drained {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    queued = self.queued_len(),
                    buffered = shipper.buffered(),
                    timeout_ms = self.settings.flush_timeout.as_millis() as u64,
                    "flush timed out"
                );
                return;
            }
        }
    }

    async fn shutdown(&self) {
        self.start();
        if let Some(shipper) = self.shipper() {
            shipper.shutdown().await;
        }
        tracing::info!(metrics = ?self.metrics.snapshot(), "tracer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::testing::RecordingExporter;
    use crate::trace::ObservationLevel;
    use serde_json::json;

    fn tracer() -> (IngestionTracer, Arc<RecordingExporter>) {
        let exporter = Arc::new(RecordingExporter::new());
        (IngestionTracer::new(exporter.clone(), TracerSettings::default()), exporter)
    }

    #[test]
    fn test_start_observation_inherits_parent_trace() {
        let (tracer, _) = tracer();
        let trace = tracer.start_trace("t", Value::Null);
        let parent = tracer.start_span(trace.as_str(), "parent", Value::Null);

        let child = tracer.start_observation(parent.as_str(), ObservationKind::Tool, "child", Value::Null);
        let child = tracer.registry().observation(child.as_str()).unwrap();
        assert_eq!(child.trace_id, trace.as_str());
        assert_eq!(child.parent_observation_id.as_deref(), Some(parent.as_str()));
    }

    #[test]
    fn test_end_span_sets_error_level() {
        let (tracer, _) = tracer();
        let ok = tracer.start_span("T1", "ok", Value::Null);
        let failed = tracer.start_span("T1", "failed", Value::Null);

        tracer.end_span(ok.as_str(), json!("done"), None);
        tracer.end_span(failed.as_str(), Value::Null, Some("boom"));

        let ok = tracer.registry().observation(ok.as_str()).unwrap();
        assert_eq!(ok.level, ObservationLevel::Default);
        assert_eq!(ok.output, json!("done"));

        let failed = tracer.registry().observation(failed.as_str()).unwrap();
        assert_eq!(failed.level, ObservationLevel::Error);
        assert_eq!(failed.status_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unknown_end_is_counted_noop() {
        let (tracer, _) = tracer();
        let span = tracer.start_span("T1", "s", Value::Null);
        let before = tracer.registry().observation(span.as_str()).unwrap();
        let queued = tracer.queued_len();

        tracer.end_span("missing", Value::Null, None);
        tracer.end_generation_span("missing", Map::new(), UsageMetrics::default(), None);
        tracer.end_trace("missing", Value::Null);

        let metrics = tracer.metrics();
        assert_eq!(metrics.unknown_ends, 3);
        assert_eq!(tracer.queued_len(), queued);
        assert_eq!(tracer.registry().observation(span.as_str()).unwrap(), before);
    }

    #[test]
    fn test_duplicate_end_is_ignored() {
        let (tracer, _) = tracer();
        let span = tracer.start_span("T1", "s", Value::Null);
        tracer.end_span(span.as_str(), json!(1), None);
        tracer.end_span(span.as_str(), json!(2), Some("late"));

        let observation = tracer.registry().observation(span.as_str()).unwrap();
        assert_eq!(observation.output, json!(1));
        assert_eq!(tracer.metrics().duplicate_ends, 1);
    }

    #[test]
    fn test_generation_records_usage_and_metadata() {
        let (tracer, _) = tracer();
        let trace = tracer.start_trace("t", Value::Null);
        let generation = tracer.create_generation_span(trace.as_str(), None, "gen", "gpt-4.1", json!("prompt"));

        let mut metadata = Map::new();
        metadata.insert("finish_reason".to_string(), json!("stop"));
        tracer.end_generation_span(generation.as_str(), metadata, UsageMetrics::new(10, 5), None);

        let observation = tracer.registry().observation(generation.as_str()).unwrap();
        assert_eq!(observation.kind, ObservationKind::Generation);
        assert_eq!(observation.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(observation.metadata["finish_reason"], "stop");
        assert_eq!(observation.usage.as_ref().map(|u| u.total), Some(15));
        assert!(observation.is_ended());
    }

    #[test]
    fn test_generation_with_unknown_parent_falls_back_to_trace() {
        let (tracer, _) = tracer();
        let generation = tracer.create_generation_span("T1", Some("ghost"), "gen", "m", Value::Null);

        let observation = tracer.registry().observation(generation.as_str()).unwrap();
        assert_eq!(observation.trace_id, "T1");
        assert!(observation.parent_observation_id.is_none());
        assert_eq!(tracer.metrics().parent_fallbacks, 1);
    }

    #[test]
    fn test_start_outside_runtime_keeps_events_queued() {
        let (tracer, exporter) = tracer();
        tracer.start_span("T1", "s", Value::Null);

        assert!(!tracer.start());
        assert_eq!(tracer.queued_len(), 1);
        assert!(exporter.batches().is_empty());

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            assert!(tracer.start());
            tracer.shutdown().await;
        });
        assert_eq!(exporter.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_shutdown_ships_queued_events_without_explicit_start() {
        let (tracer, exporter) = tracer();
        let trace = tracer.start_trace("t", Value::Null);
        tracer.end_trace(trace.as_str(), json!("answer"));

        tracer.shutdown().await;

        assert_eq!(exporter.batch_sizes(), vec![2]);
        let batch = &exporter.batches()[0];
        assert_eq!(batch[0].kind, IngestionKind::TraceCreate);
        assert_eq!(batch[1].kind, IngestionKind::TraceCreate);
        assert_eq!(tracer.metrics().events_shipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_delivery() {
        let (tracer, exporter) = tracer();
        assert!(tracer.start());
        assert!(!tracer.start());

        for i in 0..3 {
            tracer.start_span("T1", &format!("s{i}"), Value::Null);
        }
        tracer.flush().await;

        assert_eq!(exporter.batch_sizes(), vec![3]);
        assert_eq!(tracer.queued_len(), 0);
        tracer.shutdown().await;
    }

    #[tokio::test]
    async fn test_noop_tracer_satisfies_contract() {
        let tracer: Arc<dyn Tracer> = Arc::new(NoopTracer::new());
        let trace = tracer.start_trace("t", Value::Null);
        let span = tracer.start_span(trace.as_str(), "s", Value::Null);
        assert_ne!(trace.as_str(), span.as_str());

        tracer.end_span(span.as_str(), Value::Null, Some("ignored"));
        let event = AgentEvent::new("anything", trace.as_str(), tracewire_core::EventPayload::Empty);
        assert!(tracer.emit_event(&event).is_ok());
        tracer.flush().await;
        tracer.shutdown().await;
        assert_eq!(tracer.provider(), "noop");
    }
}
