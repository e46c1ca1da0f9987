//! Windowed aggregator
//!
//! Every period P the readings still in the store with a timestamp before
//! the tick are reduced to their rounded mean, classified, stored as an
//! aggregate, and deleted. Consumed readings are deleted, so in steady state
//! a tick covers `[now - P, now)`; anything older that is still present
//! (a failed tick, a restored snapshot) is unconsumed and joins this window.
//!
//! Deletion is keyed on the exact ids that were read, so a reading stored
//! while the tick runs is never lost. If the aggregate cannot be stored,
//! nothing is deleted and the next tick picks the same readings up again.
//! If the delete fails after the aggregate is stored, the ids are parked and
//! the delete is retried at the start of every tick; parked readings are
//! never summed again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time;

use super::classifier::Thresholds;
use super::event::{Event, EventBus};
use super::gateway::PipelineError;
use crate::data::{AggregateResult, ReadingId};
use crate::storage::ReadingStore;

/// Default aggregation period
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    /// No readings in the window; nothing stored or published
    Empty,
    /// Aggregate stored and published; `consumed` readings were deleted
    Aggregated {
        aggregate: AggregateResult,
        consumed: usize,
    },
}

pub struct WindowedAggregator {
    store: Arc<dyn ReadingStore>,
    thresholds: Thresholds,
    bus: Arc<EventBus>,
    period: Duration,
    /// Readings already folded into a stored aggregate whose delete failed.
    /// The lock also serializes ticks.
    pending_deletes: Mutex<Vec<ReadingId>>,
    running: Arc<AtomicBool>,
}

impl WindowedAggregator {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        thresholds: Thresholds,
        bus: Arc<EventBus>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            thresholds,
            bus,
            period,
            pending_deletes: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of consumed readings still waiting to be purged
    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes.lock().len()
    }

    /// Run one aggregation tick for the window ending at `now`
    pub fn run_window(&self, now: DateTime<Utc>) -> Result<WindowOutcome, PipelineError> {
        let mut pending = self.pending_deletes.lock();

        if !pending.is_empty() {
            match self.store.delete_readings(&pending) {
                Ok(n) => {
                    tracing::info!(readings = n, "Purged readings from an earlier window");
                    pending.clear();
                }
                Err(e) => {
                    tracing::warn!(readings = pending.len(), error = %e, "Purge retry failed");
                }
            }
        }

        let parked: HashSet<ReadingId> = pending.iter().copied().collect();
        let readings: Vec<_> = self
            .store
            .readings_in_range(None, Some(now))?
            .into_iter()
            .filter(|r| !parked.contains(&r.id))
            .collect();

        if readings.is_empty() {
            tracing::debug!(%now, "No readings in window");
            return Ok(WindowOutcome::Empty);
        }

        let values: Vec<i64> = readings.iter().map(|r| r.value).collect();
        let ids: Vec<ReadingId> = readings.iter().map(|r| r.id).collect();

        let value = rounded_mean(&values);
        let status = self.thresholds.classify(value);

        // Readings are only deleted once the aggregate is safely stored
        let aggregate = self.store.insert_aggregate(value, status, now)?;

        let consumed = match self.store.delete_readings(&ids) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(
                    aggregate_id = %aggregate.id,
                    readings = ids.len(),
                    error = %e,
                    "Failed to purge aggregated readings, will retry next tick"
                );
                pending.extend_from_slice(&ids);
                0
            }
        };
        drop(pending);

        tracing::info!(
            value,
            status = %status,
            readings = ids.len(),
            "Window aggregated"
        );

        self.bus.publish(Event::windowed(&aggregate));

        Ok(WindowOutcome::Aggregated {
            aggregate,
            consumed,
        })
    }

    /// Start the background timer. The first tick fires one period after
    /// start, then every period, with or without data.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Windowed aggregator started with period {:?}", self.period);

            let mut interval = time::interval_at(time::Instant::now() + self.period, self.period);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = self.run_window(Utc::now()) {
                    tracing::error!(error = %e, "Aggregation tick failed, will retry next tick");
                }
            }

            tracing::info!("Windowed aggregator stopped");
        })
    }

    /// Stop the timer
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the timer is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Mean rounded to the nearest integer, halves rounded up
pub fn rounded_mean(values: &[i64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    let sum: i128 = values.iter().map(|v| *v as i128).sum();
    let count = values.len() as i128;
    // floor(sum / count + 1/2)
    (2 * sum + count).div_euclid(2 * count) as i64
}
