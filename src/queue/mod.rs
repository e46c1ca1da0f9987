//! Task queue bridge between ingestion and a decoupled consumer
//!
//! The gateway enqueues `{readingId, value}` after each stored reading; the
//! consumer settles each message with an ack or nack, giving at-least-once
//! delivery across consumer restarts.

pub mod consumer;
pub mod memory;

pub use consumer::{ConsumerStats, LivenessHandler, Settlement, TaskConsumer, TaskError, TaskHandler};
pub use memory::{Delivery, QueueContents, QueueDepth, QueueError, TaskMessage, TaskQueue};
