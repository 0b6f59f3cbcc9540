//! Background batch shipper.
//!
//! One Tokio task per tracer drains the delivery queue into an in-memory
//! batch and ships it when it reaches `batch_size`, on every interval tick
//! (if non-empty), when nudged by `flush`, and once more on shutdown.

use crate::exporter::{BatchExporter, ExportError};
use crate::metrics::DeliveryMetrics;
use crate::trace::IngestionEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Batching thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ShipperConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            batch_size: tracewire_config::DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(tracewire_config::DEFAULT_FLUSH_INTERVAL_MS),
        }
    }
}

/// Owns the shipper task. Shutdown is idempotent.
pub struct ShipperHandle {
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    nudge: Arc<Notify>,
    buffered: Arc<AtomicUsize>,
}

impl ShipperHandle {
    /// Spawns the shipper on the current Tokio runtime.
    pub fn spawn(
        rx: mpsc::Receiver<IngestionEvent>,
        exporter: Arc<dyn BatchExporter>,
        config: ShipperConfig,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let nudge = Arc::new(Notify::new());
        let buffered = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            exporter,
            config: ShipperConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            metrics,
            buffered: buffered.clone(),
            batch: Vec::with_capacity(config.batch_size.max(1)),
        };
        let task = tokio::spawn(worker.run(rx, shutdown_rx, nudge.clone()));

        tracing::debug!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "shipper started"
        );

        Self {
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
            nudge,
            buffered,
        }
    }

    /// Asks the shipper to ship its partial batch now.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Events held in the shipper's in-memory batch.
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Stops the shipper: closes the queue, ships what was queued, ships the
    /// final partial batch once, then waits for the task to exit.
    pub async fn shutdown(&self) {
        let sender = self.shutdown_tx.lock().ok().and_then(|mut tx| tx.take());
        let Some(sender) = sender else {
            return;
        };
        let _ = sender.send(());

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "shipper task ended abnormally");
            }
        }
    }
}

struct Worker {
    exporter: Arc<dyn BatchExporter>,
    config: ShipperConfig,
    metrics: Arc<DeliveryMetrics>,
    buffered: Arc<AtomicUsize>,
    batch: Vec<IngestionEvent>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<IngestionEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
        nudge: Arc<Notify>,
    ) {
        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                received = rx.recv() => match received {
                    Some(event) => self.push(event).await,
                    None => break,
                },
                _ = ticker.tick() => self.ship_partial("interval").await,
                _ = nudge.notified() => self.ship_partial("flush").await,
            }
        }

        rx.close();
        while let Some(event) = rx.recv().await {
            self.push(event).await;
        }
        self.ship_partial("shutdown").await;
        tracing::debug!("shipper stopped");
    }

    async fn push(&mut self, event: IngestionEvent) {
        self.batch.push(event);
        self.buffered.store(self.batch.len(), Ordering::Release);
        if self.batch.len() >= self.config.batch_size {
            self.ship("size").await;
        }
    }

    async fn ship_partial(&mut self, trigger: &'static str) {
        if !self.batch.is_empty() {
            self.ship(trigger).await;
        }
    }

    async fn ship(&mut self, trigger: &'static str) {
        let batch = std::mem::take(&mut self.batch);
        let size = batch.len();

        match self.exporter.export(&batch).await {
            Ok(()) => {
                self.metrics.record_shipped(size);
                tracing::debug!(
                    exporter = self.exporter.name(),
                    batch_size = size,
                    trigger,
                    "shipped batch"
                );
            }
            Err(ExportError::Serialization(e)) => {
                self.metrics.record_failed(size);
                tracing::error!(batch_size = size, error = %e, "dropping unencodable batch");
            }
            Err(e) => {
                self.metrics.record_failed(size);
                tracing::warn!(
                    exporter = self.exporter.name(),
                    batch_size = size,
                    trigger,
                    error = %e,
                    "batch delivery failed, dropping batch"
                );
            }
        }

        self.batch = Vec::with_capacity(self.config.batch_size);
        self.buffered.store(0, Ordering::Release);
    }
}
