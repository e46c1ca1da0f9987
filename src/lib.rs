//! pulsewatch: real-time pulse telemetry aggregation and alerting
//!
//! Raw readings come in one at a time, are stored and classified, and are
//! pushed to live subscribers straight away. On a fixed period the readings
//! of the last window are reduced to a rounded mean, classified, stored as an
//! aggregate result and pushed the same way. Abnormal results also go out as
//! alerts to every registered notification target.
//!
//! # Features
//!
//! - **Ingestion**: HTTP `POST /reading-data`, optional Kafka consumer (`kafka` feature)
//! - **Windowed aggregation**: aggregate-then-delete, with parked ids retried when a purge fails
//! - **Live push**: WebSocket subscribers fed from an in-process event bus
//! - **Alerts**: Telegram Bot API, webhook, or log
//! - **Task queue**: ack/nack queue with redelivery for decoupled consumers
//! - **Snapshots**: optional on-disk snapshots of the store and the task queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulsewatch::pipeline::{EventBus, IngestionGateway, Thresholds};
//! use pulsewatch::storage::StorageEngine;
//!
//! let store = Arc::new(StorageEngine::new());
//! let bus = Arc::new(EventBus::default());
//! let gateway = IngestionGateway::new(store, Thresholds::default(), bus);
//!
//! let id = gateway.ingest(&serde_json::json!({"number": 72})).unwrap();
//! println!("Stored reading {}", id);
//! ```

pub mod alerts;
pub mod api;
pub mod data;
pub mod ingest;
pub mod live;
pub mod pipeline;
pub mod queue;
pub mod storage;

// Re-export commonly used types
pub use data::{AggregateResult, Reading, ReadingId, Status};
pub use pipeline::{classify, Event, EventBus, IngestionGateway, PipelineError, WindowedAggregator};
pub use storage::{ReadingStore, StorageEngine, StorageError};
