//! Store doubles for unit tests

use chrono::{DateTime, Utc};

use super::engine::{ReadingStore, StorageError, StoreStats};
use crate::data::{AggregateResult, Reading, ReadingId, Status};

/// Store whose every operation fails
pub struct DownStore;

fn refused() -> StorageError {
    StorageError::Unavailable("connection refused".to_string())
}

impl ReadingStore for DownStore {
    fn record_reading(&self, _: i64) -> Result<Reading, StorageError> {
        Err(refused())
    }
    fn insert_reading(&self, _: i64, _: DateTime<Utc>) -> Result<Reading, StorageError> {
        Err(refused())
    }
    fn get_reading(&self, _: ReadingId) -> Result<Option<Reading>, StorageError> {
        Err(refused())
    }
    fn readings_in_range(
        &self,
        _: Option<DateTime<Utc>>,
        _: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StorageError> {
        Err(refused())
    }
    fn delete_readings(&self, _: &[ReadingId]) -> Result<usize, StorageError> {
        Err(refused())
    }
    fn insert_aggregate(
        &self,
        _: i64,
        _: Status,
        _: DateTime<Utc>,
    ) -> Result<AggregateResult, StorageError> {
        Err(refused())
    }
    fn aggregates_in_range(
        &self,
        _: Option<DateTime<Utc>>,
        _: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateResult>, StorageError> {
        Err(refused())
    }
    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}
