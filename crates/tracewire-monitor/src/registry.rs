//! In-flight traces, observations and the per-trace hierarchy index.

use crate::trace::{Observation, TraceRecord};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

/// Levels tracked by the hierarchy index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyLevel {
    Agent,
    Conversation,
    Generation,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::Agent => "agent",
            HierarchyLevel::Conversation => "conversation",
            HierarchyLevel::Generation => "generation",
        }
    }
}

/// trace id -> current span id, one map per level. Last writer wins.
#[derive(Debug, Default)]
struct HierarchyIndex {
    agent: HashMap<String, String>,
    conversation: HashMap<String, String>,
    generation: HashMap<String, String>,
}

impl HierarchyIndex {
    fn level(&self, level: HierarchyLevel) -> &HashMap<String, String> {
        match level {
            HierarchyLevel::Agent => &self.agent,
            HierarchyLevel::Conversation => &self.conversation,
            HierarchyLevel::Generation => &self.generation,
        }
    }

    fn level_mut(&mut self, level: HierarchyLevel) -> &mut HashMap<String, String> {
        match level {
            HierarchyLevel::Agent => &mut self.agent,
            HierarchyLevel::Conversation => &mut self.conversation,
            HierarchyLevel::Generation => &mut self.generation,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    traces: HashMap<String, TraceRecord>,
    observations: HashMap<String, Observation>,
    hierarchy: HierarchyIndex,
}

/// Where a new observation attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Attached under a known observation, inheriting its trace.
    Child,
    /// Rooted directly under a trace.
    Root,
}

/// Outcome of ending an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    Ended(Observation),
    Unknown,
    AlreadyEnded,
}

/// Concurrent store guarded by a single reader/writer lock.
///
/// Traces and observations are never evicted; they live as long as the
/// tracer that owns the registry.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a trace unless one with the same id already exists.
    ///
    /// Returns a snapshot only when this call created the trace; an existing
    /// trace keeps its name, input and output.
    pub fn insert_trace(&self, trace: TraceRecord) -> Option<TraceRecord> {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(trace_id = %trace.id, "registry lock poisoned, trace not recorded");
            return None;
        };
        match state.traces.entry(trace.id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(trace).clone()),
        }
    }

    /// Inserts an observation under `parent_or_trace`.
    ///
    /// A known observation id becomes the parent and donates its trace id;
    /// anything else is taken as the trace id of a root observation.
    pub fn insert_observation(
        &self,
        parent_or_trace: &str,
        mut observation: Observation,
    ) -> Option<(Observation, Placement)> {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(span_id = %observation.id, "registry lock poisoned, observation not recorded");
            return None;
        };

        let placement = match state.observations.get(parent_or_trace) {
            Some(parent) => {
                observation.trace_id = parent.trace_id.clone();
                observation.parent_observation_id = Some(parent.id.clone());
                Placement::Child
            }
            None => {
                observation.trace_id = parent_or_trace.to_string();
                observation.parent_observation_id = None;
                Placement::Root
            }
        };

        state
            .observations
            .insert(observation.id.clone(), observation.clone());
        Some((observation, placement))
    }

    /// Inserts an observation in `trace_id`, under `parent` when it is a
    /// known observation.
    pub fn insert_in_trace(
        &self,
        trace_id: &str,
        parent: Option<&str>,
        mut observation: Observation,
    ) -> Option<(Observation, Placement)> {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(span_id = %observation.id, "registry lock poisoned, observation not recorded");
            return None;
        };

        let known_parent = parent.and_then(|id| state.observations.get(id));
        let placement = match known_parent {
            Some(parent) => {
                observation.trace_id = parent.trace_id.clone();
                observation.parent_observation_id = Some(parent.id.clone());
                Placement::Child
            }
            None => {
                observation.trace_id = trace_id.to_string();
                observation.parent_observation_id = None;
                Placement::Root
            }
        };

        state
            .observations
            .insert(observation.id.clone(), observation.clone());
        Some((observation, placement))
    }

    /// Applies `finish` to an open observation exactly once.
    pub fn end_observation<F>(&self, id: &str, finish: F) -> EndOutcome
    where
        F: FnOnce(&mut Observation),
    {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(span_id = %id, "registry lock poisoned, end ignored");
            return EndOutcome::Unknown;
        };
        let Some(observation) = state.observations.get_mut(id) else {
            return EndOutcome::Unknown;
        };
        if observation.is_ended() {
            return EndOutcome::AlreadyEnded;
        }
        finish(observation);
        EndOutcome::Ended(observation.clone())
    }

    /// Sets a trace's output unconditionally.
    pub fn end_trace(&self, id: &str, output: Value) -> Option<TraceRecord> {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(trace_id = %id, "registry lock poisoned, end ignored");
            return None;
        };
        let trace = state.traces.get_mut(id)?;
        trace.output = Some(output);
        Some(trace.clone())
    }

    /// Sets a trace's output only if none is recorded yet.
    ///
    /// Returns the updated trace when this call won.
    pub fn backfill_trace_output(&self, id: &str, output: &str) -> Option<TraceRecord> {
        let Ok(mut state) = self.state.write() else {
            return None;
        };
        let trace = state.traces.get_mut(id)?;
        if !trace.output_is_empty() {
            return None;
        }
        trace.output = Some(Value::String(output.to_string()));
        Some(trace.clone())
    }

    pub fn set_current(&self, trace_id: &str, level: HierarchyLevel, span_id: &str) {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(trace_id = %trace_id, level = level.as_str(), "registry lock poisoned, index not updated");
            return;
        };
        state
            .hierarchy
            .level_mut(level)
            .insert(trace_id.to_string(), span_id.to_string());
    }

    /// Current span of `level` for a trace (shared lock).
    pub fn current(&self, trace_id: &str, level: HierarchyLevel) -> Option<String> {
        let state = self.state.read().ok()?;
        state.hierarchy.level(level).get(trace_id).cloned()
    }

    pub fn trace(&self, id: &str) -> Option<TraceRecord> {
        let state = self.state.read().ok()?;
        state.traces.get(id).cloned()
    }

    pub fn observation(&self, id: &str) -> Option<Observation> {
        let state = self.state.read().ok()?;
        state.observations.get(id).cloned()
    }

    pub fn contains_observation(&self, id: &str) -> bool {
        self.state
            .read()
            .map(|state| state.observations.contains_key(id))
            .unwrap_or(false)
    }

    /// Observations of one trace, ordered by start time.
    pub fn observations_for(&self, trace_id: &str) -> Vec<Observation> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut observations: Vec<Observation> = state
            .observations
            .values()
            .filter(|o| o.trace_id == trace_id)
            .cloned()
            .collect();
        observations.sort_by_key(|o| o.start_time);
        observations
    }

    pub fn trace_count(&self) -> usize {
        self.state.read().map(|s| s.traces.len()).unwrap_or(0)
    }

    pub fn observation_count(&self) -> usize {
        self.state.read().map(|s| s.observations.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ObservationKind;
    use serde_json::json;

    fn span(name: &str) -> Observation {
        Observation::new(ObservationKind::Span, name, Value::Null)
    }

    #[test]
    fn test_known_parent_donates_trace_id() {
        let registry = Registry::new();
        let (parent, _) = registry.insert_observation("T1", span("parent")).unwrap();

        let (child, placement) = registry.insert_observation(&parent.id, span("child")).unwrap();
        assert_eq!(placement, Placement::Child);
        assert_eq!(child.trace_id, "T1");
        assert_eq!(child.parent_observation_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn test_unknown_parent_is_trace_id() {
        let registry = Registry::new();
        let (root, placement) = registry.insert_observation("T9", span("root")).unwrap();
        assert_eq!(placement, Placement::Root);
        assert_eq!(root.trace_id, "T9");
        assert!(root.parent_observation_id.is_none());
    }

    #[test]
    fn test_insert_in_trace_prefers_parent_trace() {
        let registry = Registry::new();
        let (parent, _) = registry.insert_observation("T1", span("conv")).unwrap();

        let (generation, placement) = registry
            .insert_in_trace("T2", Some(&parent.id), span("gen"))
            .unwrap();
        assert_eq!(placement, Placement::Child);
        assert_eq!(generation.trace_id, "T1");

        let (orphan, placement) = registry
            .insert_in_trace("T2", Some("missing"), span("gen"))
            .unwrap();
        assert_eq!(placement, Placement::Root);
        assert_eq!(orphan.trace_id, "T2");
    }

    #[test]
    fn test_end_is_applied_once() {
        let registry = Registry::new();
        let (observation, _) = registry.insert_observation("T1", span("s")).unwrap();

        let first = registry.end_observation(&observation.id, |o| o.finish(None));
        assert!(matches!(first, EndOutcome::Ended(ref o) if o.is_ended()));

        let second = registry.end_observation(&observation.id, |o| o.finish(Some("late")));
        assert_eq!(second, EndOutcome::AlreadyEnded);
        assert!(registry.observation(&observation.id).unwrap().status_message.is_none());

        assert_eq!(registry.end_observation("nope", |o| o.finish(None)), EndOutcome::Unknown);
    }

    #[test]
    fn test_backfill_first_writer_wins() {
        let registry = Registry::new();
        registry.insert_trace(TraceRecord::new("T1", "t", Value::Null));

        assert!(registry.backfill_trace_output("T1", "first").is_some());
        assert!(registry.backfill_trace_output("T1", "second").is_none());
        assert_eq!(registry.trace("T1").unwrap().output, Some(json!("first")));
        assert!(registry.backfill_trace_output("missing", "x").is_none());
    }

    #[test]
    fn test_existing_trace_is_kept() {
        let registry = Registry::new();
        assert!(registry.insert_trace(TraceRecord::new("T1", "query_first", Value::Null)).is_some());
        registry.backfill_trace_output("T1", "4");

        assert!(registry.insert_trace(TraceRecord::new("T1", "query_second", Value::Null)).is_none());
        let trace = registry.trace("T1").unwrap();
        assert_eq!(trace.name, "query_first");
        assert_eq!(trace.output, Some(json!("4")));
        assert_eq!(registry.trace_count(), 1);
    }

    #[test]
    fn test_observations_for_one_trace() {
        let registry = Registry::new();
        let (a, _) = registry.insert_observation("T1", span("a")).unwrap();
        let (b, _) = registry.insert_observation(&a.id, span("b")).unwrap();
        registry.insert_observation("T2", span("other")).unwrap();

        assert!(registry.contains_observation(&b.id));
        assert!(!registry.contains_observation("missing"));
        let names: Vec<String> = registry
            .observations_for("T1")
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()) && names.contains(&"b".to_string()));
        assert_eq!(registry.observation_count(), 3);
    }

    #[test]
    fn test_hierarchy_last_writer_wins() {
        let registry = Registry::new();
        registry.set_current("T1", HierarchyLevel::Generation, "g1");
        registry.set_current("T1", HierarchyLevel::Generation, "g2");

        assert_eq!(registry.current("T1", HierarchyLevel::Generation).as_deref(), Some("g2"));
        assert!(registry.current("T1", HierarchyLevel::Agent).is_none());
        assert!(registry.current("T2", HierarchyLevel::Generation).is_none());
    }
}
