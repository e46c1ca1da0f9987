//! Kafka consumer for telemetry readings
//!
//! Each message carries one reading, in any encoding the ingestion gateway
//! accepts: a bare number, a numeric string, or `{"number": ...}`.
//!
//! ## Delivery
//!
//! Offsets are committed manually once the gateway has answered. Invalid
//! payloads are committed (redelivery cannot fix them). A store failure is
//! retried in place with backoff and never committed until it succeeds.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KAFKA_BROKERS`: Comma-separated list of brokers (default: localhost:9092)
//! - `KAFKA_TOPICS`: Comma-separated list of topics to consume
//! - `KAFKA_GROUP_ID`: Consumer group ID (default: pulsewatch)
//! - `KAFKA_AUTO_OFFSET_RESET`: Where to start if no offset (earliest/latest, default: earliest)

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio::sync::mpsc;

use crate::data::parse_reading_payload;
use crate::pipeline::{IngestionGateway, PipelineError};

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topics: Vec<String>,
    pub group_id: String,
    /// earliest or latest
    pub auto_offset_reset: String,
    pub session_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topics: vec![],
            group_id: "pulsewatch".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30000,
        }
    }
}

impl KafkaConfig {
    /// Config from environment, or None when no topics are set
    pub fn from_env() -> Option<Self> {
        let topics = std::env::var("KAFKA_TOPICS").ok()?;
        let topics: Vec<String> = topics
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if topics.is_empty() {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.brokers),
            topics,
            group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            auto_offset_reset: std::env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            session_timeout_ms: defaults.session_timeout_ms,
        })
    }
}

/// Consumer counters
#[derive(Debug, Clone, Default)]
pub struct KafkaStats {
    pub messages_received: u64,
    pub readings_ingested: u64,
    pub invalid: u64,
    pub store_errors: u64,
}

/// What to do with a message after handing it to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageAction {
    Commit,
    Retry,
}

pub struct KafkaConsumer {
    config: KafkaConfig,
    gateway: Arc<IngestionGateway>,
    consumer: StreamConsumer,
    stats: Arc<parking_lot::RwLock<KafkaStats>>,
}

impl KafkaConsumer {
    pub fn new(config: KafkaConfig, gateway: Arc<IngestionGateway>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()?;

        Ok(Self {
            config,
            gateway,
            consumer,
            stats: Arc::new(parking_lot::RwLock::new(KafkaStats::default())),
        })
    }

    pub fn subscribe(&self) -> Result<(), KafkaError> {
        let topics: Vec<&str> = self.config.topics.iter().map(|s| s.as_str()).collect();
        self.consumer.subscribe(&topics)?;
        tracing::info!(topics = ?self.config.topics, "Subscribed to Kafka topics");
        Ok(())
    }

    pub fn stats(&self) -> KafkaStats {
        self.stats.read().clone()
    }

    /// Start consuming in background. Send on the returned channel to stop.
    pub fn start(self) -> (mpsc::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let consumer = self.consumer;
        let gateway = self.gateway;
        let stats = self.stats;

        let handle = tokio::spawn(async move {
            tracing::info!("Kafka consumer started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Kafka consumer shutting down");
                        break;
                    }
                    result = consumer.recv() => {
                        let message = match result {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::error!(error = %e, "Kafka receive error");
                                tokio::time::sleep(Duration::from_millis(100)).await;
                                continue;
                            }
                        };

                        stats.write().messages_received += 1;
                        let payload = message.payload().unwrap_or_default();

                        loop {
                            match Self::handle_payload(&gateway, &stats, payload) {
                                MessageAction::Commit => break,
                                MessageAction::Retry => {
                                    tokio::select! {
                                        _ = shutdown_rx.recv() => {
                                            tracing::info!("Kafka consumer shutting down mid-retry");
                                            return;
                                        }
                                        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                                    }
                                }
                            }
                        }

                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::error!(
                                topic = %message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                error = %e,
                                "Failed to commit offset"
                            );
                        }
                    }
                }
            }
        });

        (shutdown_tx, handle)
    }

    fn handle_payload(
        gateway: &IngestionGateway,
        stats: &parking_lot::RwLock<KafkaStats>,
        payload: &[u8],
    ) -> MessageAction {
        let value = match parse_reading_payload(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid telemetry message");
                stats.write().invalid += 1;
                return MessageAction::Commit;
            }
        };

        match gateway.record(value) {
            Ok(ingested) => {
                tracing::debug!(reading_id = %ingested.reading.id, value, "Telemetry reading ingested");
                stats.write().readings_ingested += 1;
                MessageAction::Commit
            }
            Err(PipelineError::InvalidReading(e)) => {
                tracing::warn!(error = %e, "Skipping invalid telemetry message");
                stats.write().invalid += 1;
                MessageAction::Commit
            }
            Err(PipelineError::StoreUnavailable(e)) => {
                tracing::error!(value, error = %e, "Store unavailable, retrying message");
                stats.write().store_errors += 1;
                MessageAction::Retry
            }
        }
    }
}
