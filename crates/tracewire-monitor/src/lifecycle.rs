//! Process-wide observability context.
//!
//! Build one [`Observability`] at startup and share it by reference. The
//! real tracer is constructed at most once, on first request: credentials,
//! HTTP client, auth health check, then the shipper. A failed attempt is
//! remembered and never retried; callers asking through
//! [`Observability::tracer`] get the Noop tracer instead.

use crate::exporter::{ExportError, IngestionClient};
use crate::tracer::{IngestionTracer, NoopTracer, Tracer, TracerSettings};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracewire_config::{ConfigError, ObservabilityConfig, Provider};

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Tracing configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build tracing client: {0}")]
    Client(ExportError),

    #[error("Tracing backend authentication failed: {0}")]
    Authentication(ExportError),

    #[error("Tracer initialization previously failed: {0}")]
    PreviouslyFailed(String),
}

enum InitState {
    Uninitialized,
    Ready(Arc<IngestionTracer>),
    Failed(String),
}

pub struct Observability {
    config: ObservabilityConfig,
    state: Mutex<InitState>,
}

impl Observability {
    pub fn new(config: ObservabilityConfig) -> Self {
        Self {
            config,
            state: Mutex::new(InitState::Uninitialized),
        }
    }

    /// Reads configuration from `.env` and the process environment.
    pub fn from_env() -> Self {
        Self::new(ObservabilityConfig::from_env())
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    /// The tracer to hand to agents. Never fails: any initialization problem
    /// yields the Noop tracer.
    pub async fn tracer(&self) -> Arc<dyn Tracer> {
        if self.config.provider == Provider::Noop {
            return Arc::new(NoopTracer::new());
        }
        match self.ingestion_tracer().await {
            Ok(tracer) => tracer as Arc<dyn Tracer>,
            Err(InitError::PreviouslyFailed(reason)) => {
                tracing::debug!(reason = %reason, "using noop tracer");
                Arc::new(NoopTracer::new())
            }
            Err(e) => {
                tracing::warn!(error = %e, "tracing unavailable, falling back to noop");
                Arc::new(NoopTracer::new())
            }
        }
    }

    /// The shared real tracer, initializing it on first call.
    ///
    /// Concurrent first callers are serialized; only one performs the
    /// initialization. After a failure every call returns
    /// [`InitError::PreviouslyFailed`].
    pub async fn ingestion_tracer(&self) -> Result<Arc<IngestionTracer>, InitError> {
        let mut state = self.state.lock().await;
        match &*state {
            InitState::Ready(tracer) => return Ok(tracer.clone()),
            InitState::Failed(reason) => return Err(InitError::PreviouslyFailed(reason.clone())),
            InitState::Uninitialized => {}
        }

        match self.initialize().await {
            Ok(tracer) => {
                *state = InitState::Ready(tracer.clone());
                Ok(tracer)
            }
            Err(e) => {
                *state = InitState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<Arc<IngestionTracer>, InitError> {
        self.config.validate()?;
        let credentials = self.config.credentials()?;
        let host = credentials.host.clone();

        let client = IngestionClient::new(credentials, self.config.request_timeout())
            .map_err(InitError::Client)?;
        client
            .health_check()
            .await
            .map_err(InitError::Authentication)?;

        let tracer = Arc::new(IngestionTracer::new(
            Arc::new(client),
            TracerSettings::from(&self.config),
        ));
        tracer.start();
        tracing::info!(host = %host, "tracing backend connected");
        Ok(tracer)
    }

    /// True once the real tracer has been published.
    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().await, InitState::Ready(_))
    }

    /// Shuts the real tracer down if it was ever started.
    pub async fn shutdown(&self) {
        let tracer = match &*self.state.lock().await {
            InitState::Ready(tracer) => Some(tracer.clone()),
            _ => None,
        };
        if let Some(tracer) = tracer {
            tracer.shutdown().await;
        }
    }
}
