//! Snapshot manager for saving and restoring the reading store and the
//! task queue

use super::file::FileBackend;
use super::{PersistenceBackend, PersistenceConfig, PersistenceError};
use crate::queue::{QueueContents, TaskQueue};
use crate::storage::{StorageEngine, StoreContents};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

const STORE_KEY: &str = "store";
const META_KEY: &str = "_latest";
const SCHEMA_VERSION: u32 = 1;

fn queue_key(name: &str) -> String {
    format!("queue_{}", name)
}

/// Snapshot metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMetadata {
    /// Creation timestamp (epoch ms)
    pub created_at: i64,
    pub readings: usize,
    pub aggregates: usize,
    /// Total size in bytes
    pub size_bytes: usize,
    /// Schema version for compatibility
    pub schema_version: u32,
}

/// Manages snapshots for restart recovery
pub struct SnapshotManager {
    backend: FileBackend,
    latest_snapshot: RwLock<Option<SnapshotMetadata>>,
}

impl SnapshotManager {
    /// Create a new snapshot manager
    pub fn new(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        let backend = FileBackend::new(config)?;

        let manager = Self {
            backend,
            latest_snapshot: RwLock::new(None),
        };

        // Load latest snapshot metadata if exists
        manager.load_latest_metadata()?;

        Ok(manager)
    }

    fn load_latest_metadata(&self) -> Result<(), PersistenceError> {
        if let Some(data) = self.backend.read(META_KEY)? {
            let metadata: SnapshotMetadata = serde_json::from_slice(&data)
                .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
            *self.latest_snapshot.write() = Some(metadata);
        }
        Ok(())
    }

    /// Write the full store to disk
    pub fn create_snapshot(&self, engine: &StorageEngine) -> Result<SnapshotMetadata, PersistenceError> {
        let contents = engine.contents();
        let data = serde_json::to_vec(&contents)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        self.backend.write(STORE_KEY, &data)?;

        let metadata = SnapshotMetadata {
            created_at: chrono::Utc::now().timestamp_millis(),
            readings: contents.readings.len(),
            aggregates: contents.aggregates.len(),
            size_bytes: data.len(),
            schema_version: SCHEMA_VERSION,
        };

        let metadata_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        self.backend.write(META_KEY, &metadata_bytes)?;
        *self.latest_snapshot.write() = Some(metadata.clone());

        Ok(metadata)
    }

    /// Rebuild a store from the last snapshot, if there is one
    pub fn restore(&self) -> Result<Option<StorageEngine>, PersistenceError> {
        let Some(data) = self.backend.read(STORE_KEY)? else {
            return Ok(None);
        };

        let contents: StoreContents = serde_json::from_slice(&data)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

        tracing::info!(
            readings = contents.readings.len(),
            aggregates = contents.aggregates.len(),
            "Restored store from snapshot"
        );

        Ok(Some(StorageEngine::from_contents(contents)))
    }

    /// Write every message the queue still owes a consumer. Returns how many
    /// were written.
    pub fn save_queue(&self, queue: &TaskQueue) -> Result<usize, PersistenceError> {
        let contents = queue.contents();
        let data = serde_json::to_vec(&contents)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        self.backend.write(&queue_key(queue.name()), &data)?;
        Ok(contents.len())
    }

    /// Rebuild the named queue from its last snapshot, if there is one
    pub fn restore_queue(&self, name: &str) -> Result<Option<TaskQueue>, PersistenceError> {
        let Some(data) = self.backend.read(&queue_key(name))? else {
            return Ok(None);
        };

        let contents: QueueContents = serde_json::from_slice(&data)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

        tracing::info!(
            queue = name,
            unacked = contents.unacked.len(),
            ready = contents.ready.len(),
            "Restored task queue from snapshot"
        );

        Ok(Some(TaskQueue::from_contents(name, contents)))
    }

    /// Get the latest snapshot metadata
    pub fn latest_snapshot(&self) -> Option<SnapshotMetadata> {
        self.latest_snapshot.read().clone()
    }

    /// Remove the snapshot
    pub fn clear(&self) -> Result<(), PersistenceError> {
        self.backend.delete(STORE_KEY)?;
        self.backend.delete(META_KEY)?;
        *self.latest_snapshot.write() = None;
        Ok(())
    }
}

/// Background worker that periodically snapshots the store and, when one is
/// attached, the task queue
pub struct SnapshotWorker {
    engine: Arc<StorageEngine>,
    queue: Option<Arc<TaskQueue>>,
    manager: Arc<SnapshotManager>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl SnapshotWorker {
    pub fn new(engine: Arc<StorageEngine>, manager: Arc<SnapshotManager>, interval: Duration) -> Self {
        Self {
            engine,
            queue: None,
            manager,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Also snapshot this queue
    pub fn with_queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Snapshot worker started with interval {:?}", self.interval);

            let mut interval = time::interval_at(time::Instant::now() + self.interval, self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                self.snapshot_now();
            }

            tracing::info!("Snapshot worker stopped");
        })
    }

    /// Take a snapshot immediately, logging the outcome
    pub fn snapshot_now(&self) {
        match self.manager.create_snapshot(&self.engine) {
            Ok(meta) => tracing::debug!(
                readings = meta.readings,
                aggregates = meta.aggregates,
                size_bytes = meta.size_bytes,
                "Store snapshot written"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to write store snapshot"),
        }

        if let Some(queue) = &self.queue {
            match self.manager.save_queue(queue) {
                Ok(messages) => tracing::debug!(queue = queue.name(), messages, "Queue snapshot written"),
                Err(e) => tracing::error!(queue = queue.name(), error = %e, "Failed to write queue snapshot"),
            }
        }
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
