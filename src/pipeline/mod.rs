//! Core pipeline: classification, ingestion, windowed aggregation, and the
//! event bus connecting them to downstream consumers

pub mod aggregator;
pub mod classifier;
pub mod event;
pub mod gateway;

pub use aggregator::{rounded_mean, WindowOutcome, WindowedAggregator, DEFAULT_WINDOW};
pub use classifier::{classify, ThresholdError, Thresholds, HIGH_THRESHOLD, LOW_THRESHOLD};
pub use event::{Event, EventBus, EventKind};
pub use gateway::{Ingested, IngestionGateway, PipelineError};
