//! Queue consumer: receive, process, then ack or nack

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::memory::{Delivery, TaskMessage, TaskQueue};

/// Per-message processing. Must be idempotent: a nacked or recovered message
/// is handed over again.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &TaskMessage) -> Result<(), TaskError>;
}

/// Default handler. Aggregation is owned by the windowed aggregator, so the
/// queue path only counts that the message made it through. Holds no
/// per-message state, so handling a message twice changes nothing but the
/// counter.
#[derive(Default)]
pub struct LivenessHandler {
    handled: AtomicU64,
}

impl LivenessHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries handled, redeliveries included
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

impl TaskHandler for LivenessHandler {
    fn handle(&self, task: &TaskMessage) -> Result<(), TaskError> {
        self.handled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            reading_id = %task.reading_id,
            value = task.value,
            "Task handled; aggregation happens on the window timer"
        );
        Ok(())
    }
}

/// Consumer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub redelivered: u64,
}

/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
}

pub struct TaskConsumer {
    queue: Arc<TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    stats: Arc<RwLock<ConsumerStats>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl TaskConsumer {
    pub fn new(queue: Arc<TaskQueue>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            queue,
            handler,
            stats: Arc::new(RwLock::new(ConsumerStats::default())),
            shutdown_tx: None,
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.read().clone()
    }

    /// Process one delivery and settle it with the queue
    pub fn process(&self, delivery: Delivery) -> Settlement {
        Self::process_delivery(&self.queue, self.handler.as_ref(), &self.stats, delivery)
    }

    fn process_delivery(
        queue: &TaskQueue,
        handler: &dyn TaskHandler,
        stats: &RwLock<ConsumerStats>,
        delivery: Delivery,
    ) -> Settlement {
        {
            let mut s = stats.write();
            s.received += 1;
            if delivery.redelivered {
                s.redelivered += 1;
            }
        }

        tracing::debug!(
            tag = delivery.tag,
            reading_id = %delivery.message.reading_id,
            redelivered = delivery.redelivered,
            "Task received"
        );

        match handler.handle(&delivery.message) {
            Ok(()) => {
                if let Err(e) = queue.ack(delivery.tag) {
                    tracing::error!(tag = delivery.tag, error = %e, "Failed to ack task");
                }
                stats.write().acked += 1;
                Settlement::Acked
            }
            Err(e) => {
                tracing::error!(
                    tag = delivery.tag,
                    reading_id = %delivery.message.reading_id,
                    error = %e,
                    "Task processing failed, requeueing"
                );
                if let Err(e) = queue.nack(delivery.tag) {
                    tracing::error!(tag = delivery.tag, error = %e, "Failed to nack task");
                }
                stats.write().nacked += 1;
                Settlement::Nacked
            }
        }
    }

    /// Start consuming in background.
    ///
    /// Anything left unacked by a previous consumer is recovered first, so a
    /// restart never loses a message. Only one consumer per queue is expected.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let recovered = queue.recover();
            tracing::info!(queue = %queue.name(), recovered, "Task consumer started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Task consumer shutting down");
                        break;
                    }
                    delivery = queue.receive() => {
                        match delivery {
                            Some(delivery) => {
                                Self::process_delivery(&queue, handler.as_ref(), &stats, delivery);
                            }
                            None => {
                                tracing::info!("Task queue closed, consumer exiting");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Stop the background consumer
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task processing failed: {0}")]
    Processing(String),
}
