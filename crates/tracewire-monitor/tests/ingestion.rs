//! End-to-end delivery against a fake ingestion backend.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracewire_config::{Credentials, ObservabilityConfig};
use tracewire_core::{AgentEnd, AgentEvent, AgentStart, EventKind, EventPayload};
use tracewire_monitor::{
    BatchExporter, ExportError, IngestionClient, IngestionEvent, IngestionKind, Observability,
    TraceRecord, Tracer,
};

const PUBLIC_KEY: &str = "pk-lf-test";
const SECRET_KEY: &str = "sk-lf-test";
const EXPECTED_AUTH: &str = "Basic cGstbGYtdGVzdDpzay1sZi10ZXN0";

// ─────────────────────────────────────────────────────────────────────────────
// Fake Backend
// ─────────────────────────────────────────────────────────────────────────────

struct Backend {
    health_status: u16,
    ingest_status: u16,
    ingest_body: String,
    health_hits: AtomicUsize,
    batches: Mutex<Vec<Value>>,
    auth_headers: Mutex<Vec<String>>,
}

impl Backend {
    fn new(health_status: u16, ingest_status: u16, ingest_body: &str) -> Arc<Self> {
        Arc::new(Self {
            health_status,
            ingest_status,
            ingest_body: ingest_body.to_string(),
            health_hits: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            auth_headers: Mutex::new(Vec::new()),
        })
    }

    fn healthy() -> Arc<Self> {
        Self::new(200, 207, r#"{"successes": [], "errors": []}"#)
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth_headers.lock().unwrap().push(value);
    }

    fn shipped_types(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|body| body["batch"].as_array().cloned().unwrap_or_default())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }
}

async fn health(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> impl IntoResponse {
    backend.health_hits.fetch_add(1, Ordering::SeqCst);
    backend.record_auth(&headers);
    let status = StatusCode::from_u16(backend.health_status).unwrap();
    (status, r#"{"status": "OK"}"#)
}

async fn ingest(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    backend.record_auth(&headers);
    backend.batches.lock().unwrap().push(body);
    let status = StatusCode::from_u16(backend.ingest_status).unwrap();
    (status, backend.ingest_body.clone())
}

async fn spawn_backend(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/api/public/health", get(health))
        .route("/api/public/ingestion", post(ingest))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn config_for(host: &str) -> ObservabilityConfig {
    let host = host.to_string();
    ObservabilityConfig::from_lookup(move |key| match key {
        "LANGFUSE_PUBLIC_KEY" => Some(PUBLIC_KEY.to_string()),
        "LANGFUSE_SECRET_KEY" => Some(SECRET_KEY.to_string()),
        "LANGFUSE_HOST" => Some(host.clone()),
        "TRACING_FLUSH_INTERVAL_MS" => Some("50".to_string()),
        "TRACING_FLUSH_TIMEOUT_MS" => Some("5000".to_string()),
        "TRACING_REQUEST_TIMEOUT_MS" => Some("2000".to_string()),
        _ => None,
    })
}

fn client_for(host: &str) -> IngestionClient {
    let credentials = Credentials {
        public_key: PUBLIC_KEY.to_string(),
        secret_key: SECRET_KEY.to_string(),
        host: host.trim_end_matches('/').to_string(),
    };
    IngestionClient::new(credentials, Duration::from_secs(2)).unwrap()
}

fn one_event() -> Vec<IngestionEvent> {
    vec![IngestionEvent::trace(TraceRecord::new("T1", "query_test", Value::Null))]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_agent_run_is_shipped_with_basic_auth() {
    let backend = Backend::healthy();
    let host = spawn_backend(backend.clone()).await;
    let observability = Observability::new(config_for(&host));

    let tracer = observability.ingestion_tracer().await.unwrap();
    assert_eq!(backend.health_hits.load(Ordering::SeqCst), 1);

    tracer
        .emit_event(&AgentEvent::new(
            EventKind::AgentStart,
            "T1",
            AgentStart {
                model_id: "openai/gpt-4.1".to_string(),
                question: Some("What is 2+2?".to_string()),
                ..Default::default()
            },
        ))
        .unwrap();
    tracer
        .emit_event(&AgentEvent::new(
            EventKind::AgentEnd,
            "T1",
            AgentEnd {
                success: true,
                result: Some("4".to_string()),
                ..Default::default()
            },
        ))
        .unwrap();

    observability.tracer().await.flush().await;

    let types = backend.shipped_types();
    assert_eq!(
        types,
        vec![
            "trace-create",
            "observation-create",
            "observation-create",
            "span-update",
            "trace-create",
        ]
    );

    let batches = backend.batches.lock().unwrap().clone();
    let last = batches
        .iter()
        .flat_map(|b| b["batch"].as_array().cloned().unwrap_or_default())
        .last()
        .unwrap();
    assert_eq!(last["body"]["id"], "T1");
    assert_eq!(last["body"]["output"], "4");
    assert_eq!(last["body"]["name"], "query_what_is_2+2");

    assert!(backend
        .auth_headers
        .lock()
        .unwrap()
        .iter()
        .all(|h| h == EXPECTED_AUTH));

    let metrics = tracer.metrics();
    assert_eq!(metrics.events_shipped, 5);
    assert_eq!(metrics.pending(), 0);

    observability.shutdown().await;
}

#[tokio::test]
async fn test_failed_health_check_falls_back_to_noop_once() {
    let backend = Backend::new(401, 200, "");
    let host = spawn_backend(backend.clone()).await;
    let observability = Observability::new(config_for(&host));

    let first = observability.tracer().await;
    let second = observability.tracer().await;

    assert_eq!(first.provider(), "noop");
    assert_eq!(second.provider(), "noop");
    assert_eq!(backend.health_hits.load(Ordering::SeqCst), 1);
    assert!(!observability.is_ready().await);

    first
        .emit_event(&AgentEvent::new(EventKind::AgentStart, "T1", EventPayload::Empty))
        .unwrap();
    first.flush().await;
    assert!(backend.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_multi_status_with_errors_is_a_failure() {
    let backend = Backend::new(200, 207, r#"{"successes": [], "errors": [{"id": "x", "status": 400, "message": "bad"}]}"#);
    let host = spawn_backend(backend.clone()).await;

    let result = client_for(&host).export(&one_event()).await;
    assert!(matches!(result, Err(ExportError::Rejected { count: 1 })));
    assert_eq!(backend.batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_multi_status_with_garbage_body_is_success() {
    let backend = Backend::new(200, 207, "not json at all");
    let host = spawn_backend(backend.clone()).await;

    assert!(client_for(&host).export(&one_event()).await.is_ok());
}

#[tokio::test]
async fn test_server_error_drops_batch_and_counts_it() {
    let backend = Backend::new(200, 500, "boom");
    let host = spawn_backend(backend.clone()).await;
    let observability = Observability::new(config_for(&host));
    let tracer = observability.ingestion_tracer().await.unwrap();

    tracer
        .emit_event(&AgentEvent::new(
            EventKind::McpServerDiscovery,
            "T1",
            EventPayload::from_value(json!({"total_servers": 3})),
        ))
        .unwrap();
    observability.tracer().await.flush().await;

    let metrics = tracer.metrics();
    assert_eq!(metrics.events_failed, 2);
    assert_eq!(metrics.events_shipped, 0);
    assert!(metrics.batches_failed >= 1);

    observability.shutdown().await;
}

#[tokio::test]
async fn test_shipped_batch_matches_ingestion_schema() {
    let backend = Backend::healthy();
    let host = spawn_backend(backend.clone()).await;

    client_for(&host).export(&one_event()).await.unwrap();

    let batches = backend.batches.lock().unwrap().clone();
    let event = &batches[0]["batch"][0];
    assert!(event["id"].is_string());
    assert_eq!(event["type"], IngestionKind::TraceCreate.as_str());
    assert!(event["timestamp"].is_string());
    assert_eq!(event["body"]["id"], "T1");
}
