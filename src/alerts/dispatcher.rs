//! Alert dispatch for abnormal events

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use super::config::format_alert_message;
use super::directory::TargetDirectory;
use super::notifier::AlertSink;
use crate::pipeline::{Event, EventBus};

/// What a single dispatch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Normal status, nothing to send
    Ignored,
    /// Directory lookup failed
    DirectoryUnavailable,
    /// Directory returned no targets
    NoTargets,
    Sent { delivered: usize, failed: usize },
}

pub struct AlertDispatcher {
    directory: Arc<dyn TargetDirectory>,
    sink: Arc<dyn AlertSink>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl AlertDispatcher {
    pub fn new(directory: Arc<dyn TargetDirectory>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            directory,
            sink,
            shutdown_tx: None,
        }
    }

    /// Send an alert for `event` to every current target.
    ///
    /// Targets are looked up fresh each time and tried independently; one
    /// failed delivery does not affect the others. Nothing is retried.
    pub async fn dispatch(&self, event: &Event) -> DispatchOutcome {
        Self::dispatch_to(self.directory.as_ref(), self.sink.as_ref(), event).await
    }

    async fn dispatch_to(
        directory: &dyn TargetDirectory,
        sink: &dyn AlertSink,
        event: &Event,
    ) -> DispatchOutcome {
        if !event.is_alertable() {
            return DispatchOutcome::Ignored;
        }

        let targets = match directory.targets() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load notification targets");
                return DispatchOutcome::DirectoryUnavailable;
            }
        };

        if targets.is_empty() {
            tracing::warn!(value = event.value, status = %event.status, "No notification targets for alert");
            return DispatchOutcome::NoTargets;
        }

        let message = format_alert_message(event);
        let results = join_all(targets.iter().map(|t| sink.deliver(t, &message))).await;

        let mut delivered = 0;
        let mut failed = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        target_id = %target.external_id,
                        error = %e,
                        "Failed to deliver alert"
                    );
                }
            }
        }

        tracing::info!(
            kind = ?event.kind,
            status = %event.status,
            delivered,
            failed,
            "Alert dispatched"
        );

        DispatchOutcome::Sent { delivered, failed }
    }

    /// Start dispatching abnormal bus events in background.
    ///
    /// Each dispatch runs on its own task so a slow target never holds up the
    /// bus receiver.
    pub fn start(&mut self, bus: &EventBus) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let directory = Arc::clone(&self.directory);
        let sink = Arc::clone(&self.sink);
        let mut events = bus.subscribe();

        tokio::spawn(async move {
            tracing::info!("Alert dispatcher started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Alert dispatcher shutting down");
                        break;
                    }
                    received = events.recv() => {
                        match received {
                            Ok(event) if event.is_alertable() => {
                                let directory = Arc::clone(&directory);
                                let sink = Arc::clone(&sink);
                                tokio::spawn(async move {
                                    Self::dispatch_to(directory.as_ref(), sink.as_ref(), &event).await;
                                });
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(missed)) => {
                                tracing::warn!(missed, "Alert dispatcher lagged behind the event bus");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    /// Stop the background dispatcher
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}
