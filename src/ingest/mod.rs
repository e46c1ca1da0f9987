//! Telemetry ingest sources
//!
//! Readings arrive over HTTP (`POST /reading-data`) by default. A Kafka
//! consumer is available behind the `kafka` feature.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConsumer, KafkaStats};
