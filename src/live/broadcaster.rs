//! Fan-out of pipeline events to live subscribers

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::registry::{SubscriberId, SubscriberRegistry};
use crate::pipeline::{Event, EventBus};

pub struct FanoutBroadcaster {
    registry: Arc<SubscriberRegistry>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl FanoutBroadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            shutdown_tx: None,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Deliver an event to every subscriber open right now.
    ///
    /// Each delivery is a non-blocking attempt. A subscriber whose channel is
    /// closed or full is dropped from the set; nothing is reported to the
    /// caller. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &Event) -> usize {
        Self::deliver(&self.registry, event)
    }

    fn deliver(registry: &SubscriberRegistry, event: &Event) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<SubscriberId> = Vec::new();

        for subscriber in registry.snapshot() {
            match subscriber.sender.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber_id = subscriber.id, "Subscriber gone");
                    dead.push(subscriber.id);
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber_id = subscriber.id, "Subscriber too slow, dropping");
                    dead.push(subscriber.id);
                }
            }
        }

        for id in dead {
            registry.deregister(id);
        }

        tracing::trace!(kind = ?event.kind, delivered, "Event broadcast");
        delivered
    }

    /// Start forwarding every bus event to subscribers
    pub fn start(&mut self, bus: &EventBus) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let registry = Arc::clone(&self.registry);
        let mut events = bus.subscribe();

        tokio::spawn(async move {
            tracing::info!("Fan-out broadcaster started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Fan-out broadcaster shutting down");
                        break;
                    }
                    received = events.recv() => {
                        match received {
                            Ok(event) => {
                                Self::deliver(&registry, &event);
                            }
                            Err(RecvError::Lagged(missed)) => {
                                tracing::warn!(missed, "Broadcaster lagged behind the event bus");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    /// Stop the forwarding task
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}
