//! Batch exporters: the HTTP ingestion client and the exporter trait.

use crate::trace::{IngestionBatch, IngestionEvent};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracewire_config::Credentials;

pub const INGESTION_PATH: &str = "/api/public/ingestion";
pub const HEALTH_PATH: &str = "/api/public/health";

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend rejected {count} batch item(s)")]
    Rejected { count: usize },

    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExportError::Timeout
        } else {
            ExportError::Transport(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exporter Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for shipped batches.
#[async_trait]
pub trait BatchExporter: Send + Sync {
    /// Ships one batch. An `Err` drops the batch; there is no retry.
    async fn export(&self, batch: &[IngestionEvent]) -> Result<(), ExportError>;

    fn name(&self) -> &str;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Ingestion Client
// ─────────────────────────────────────────────────────────────────────────────

/// Posts batches to `{host}/api/public/ingestion` with basic auth.
pub struct IngestionClient {
    http: reqwest::Client,
    credentials: Credentials,
}

impl IngestionClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, ExportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Client(e.to_string()))?;
        Ok(Self { http, credentials })
    }

    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.host, path)
    }

    /// `GET /api/public/health`. Anything but 200 is an error.
    pub async fn health_check(&self) -> Result<(), ExportError> {
        let response = self
            .http
            .get(self.url(HEALTH_PATH))
            .basic_auth(&self.credentials.public_key, Some(&self.credentials.secret_key))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BatchExporter for IngestionClient {
    async fn export(&self, batch: &[IngestionEvent]) -> Result<(), ExportError> {
        let body = serde_json::to_vec(&IngestionBatch { batch })?;

        let response = self
            .http
            .post(self.url(INGESTION_PATH))
            .basic_auth(&self.credentials.public_key, Some(&self.credentials.secret_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        classify_response(status, &body)
    }

    fn name(&self) -> &str {
        "langfuse"
    }
}

/// 200/201 succeed. 207 succeeds unless its body decodes to a non-empty
/// `errors` array; an undecodable 207 body counts as success.
pub fn classify_response(status: u16, body: &str) -> Result<(), ExportError> {
    match status {
        200 | 201 => Ok(()),
        207 => {
            let rejected = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("errors").and_then(|e| e.as_array()).map(Vec::len))
                .unwrap_or(0);
            if rejected > 0 {
                return Err(ExportError::Rejected { count: rejected });
            }
            Ok(())
        }
        _ => Err(ExportError::Status {
            status,
            body: body.chars().take(512).collect(),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Exporter
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch; optionally fails every call.
    #[derive(Default)]
    pub struct RecordingExporter {
        batches: Mutex<Vec<Vec<IngestionEvent>>>,
        fail: bool,
    }

    impl RecordingExporter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn batches(&self) -> Vec<Vec<IngestionEvent>> {
            self.batches.lock().unwrap().clone()
        }

        pub fn batch_sizes(&self) -> Vec<usize> {
            self.batches().iter().map(Vec::len).collect()
        }

        pub fn shipped_ids(&self) -> Vec<String> {
            self.batches()
                .iter()
                .flatten()
                .map(|e| e.body_id().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl BatchExporter for RecordingExporter {
        async fn export(&self, batch: &[IngestionEvent]) -> Result<(), ExportError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            if self.fail {
                return Err(ExportError::Status {
                    status: 500,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }
}
