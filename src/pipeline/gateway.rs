//! Ingestion gateway: validate, store, classify, publish

use std::sync::Arc;

use super::classifier::Thresholds;
use super::event::{Event, EventBus};
use crate::data::{parse_reading_value, Reading, ReadingId, Status, ValueError};
use crate::queue::{TaskMessage, TaskQueue};
use crate::storage::{ReadingStore, StorageError};

/// Result of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub reading: Reading,
    pub status: Status,
}

pub struct IngestionGateway {
    store: Arc<dyn ReadingStore>,
    thresholds: Thresholds,
    bus: Arc<EventBus>,
    /// Optional hand-off to the decoupled queue consumer
    queue: Option<Arc<TaskQueue>>,
}

impl IngestionGateway {
    pub fn new(store: Arc<dyn ReadingStore>, thresholds: Thresholds, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            thresholds,
            bus,
            queue: None,
        }
    }

    /// Also enqueue a task for every stored reading
    pub fn with_queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Ingest a raw payload, returning the stored reading's id.
    ///
    /// Invalid payloads are rejected before anything is written.
    pub fn ingest(&self, raw: &serde_json::Value) -> Result<ReadingId, PipelineError> {
        let value = parse_reading_value(raw).map_err(|e| {
            tracing::warn!(payload = %raw, error = %e, "Rejected invalid reading");
            PipelineError::InvalidReading(e)
        })?;

        self.record(value).map(|ingested| ingested.reading.id)
    }

    /// Store an already-validated value and fan it out.
    ///
    /// Only the store write can fail the call. Publishing and queueing are
    /// fire-and-forget: their failures are logged and swallowed.
    pub fn record(&self, value: i64) -> Result<Ingested, PipelineError> {
        let reading = self.store.record_reading(value).map_err(|e| {
            tracing::error!(value, error = %e, "Failed to store reading");
            PipelineError::StoreUnavailable(e)
        })?;

        let status = self.thresholds.classify(value);
        tracing::debug!(reading_id = %reading.id, value, status = %status, "Reading stored");

        let receivers = self.bus.publish(Event::immediate(&reading, status));
        if receivers == 0 {
            tracing::debug!(reading_id = %reading.id, "Immediate event had no consumers");
        }

        if let Some(queue) = &self.queue {
            let task = TaskMessage {
                reading_id: reading.id,
                value,
            };
            if let Err(e) = queue.enqueue(task) {
                tracing::warn!(reading_id = %reading.id, error = %e, "Failed to enqueue reading task");
            }
        }

        Ok(Ingested { reading, status })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid reading: {0}")]
    InvalidReading(#[from] ValueError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}
