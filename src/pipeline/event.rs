//! Pipeline events and the in-process bus that carries them
//!
//! Producers (the ingestion gateway and the windowed aggregator) publish to an
//! [`EventBus`]; the fan-out broadcaster and the alert dispatcher each hold
//! their own receiver, so a failure in one consumer never reaches the producer
//! or the other consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::data::{AggregateResult, Reading, Status};

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Single reading, classified on arrival
    #[serde(rename = "reading")]
    Immediate,
    /// Aggregate of one window
    #[serde(rename = "bpm_result")]
    Windowed,
}

/// Classified value on its way to subscribers and alert targets.
///
/// Serialized as `{"type", "value", "status", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub value: i64,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn immediate(reading: &Reading, status: Status) -> Self {
        Self {
            kind: EventKind::Immediate,
            value: reading.value,
            status,
            timestamp: reading.timestamp,
        }
    }

    pub fn windowed(aggregate: &AggregateResult) -> Self {
        Self {
            kind: EventKind::Windowed,
            value: aggregate.value,
            status: aggregate.status,
            timestamp: aggregate.timestamp,
        }
    }

    /// Whether this event should reach alert targets
    pub fn is_alertable(&self) -> bool {
        self.status.is_abnormal()
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest events are dropped and slow receivers
/// observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event, returning how many receivers will see it.
    ///
    /// With no receivers the event is dropped; this is never an error for
    /// the producer.
    pub fn publish(&self, event: Event) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(kind = ?event.kind, "No event consumers, event dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
