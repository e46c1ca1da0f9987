use crate::data::{AggregateId, AggregateResult, Reading, ReadingId, Status};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Append/query log of raw readings and aggregate results.
///
/// Range queries are half-open (`[from, to)`), either bound may be omitted,
/// and results are ordered ascending by timestamp. A range query must be a
/// consistent snapshot: rows inserted while it runs are either fully in or
/// fully out of the result.
pub trait ReadingStore: Send + Sync {
    /// Append a raw reading stamped with the current time. The stamp is
    /// taken while the write is exclusive, so a range query ending at `now`
    /// either sees the reading or it carries a timestamp `>= now`.
    fn record_reading(&self, value: i64) -> Result<Reading, StorageError>;

    /// Append a raw reading with a caller-supplied timestamp
    fn insert_reading(&self, value: i64, timestamp: DateTime<Utc>) -> Result<Reading, StorageError>;

    /// Look up a reading by id
    fn get_reading(&self, id: ReadingId) -> Result<Option<Reading>, StorageError>;

    /// Readings with `from <= timestamp < to`
    fn readings_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StorageError>;

    /// Delete exactly the given readings, returning how many existed
    fn delete_readings(&self, ids: &[ReadingId]) -> Result<usize, StorageError>;

    /// Append an aggregate result
    fn insert_aggregate(
        &self,
        value: i64,
        status: Status,
        timestamp: DateTime<Utc>,
    ) -> Result<AggregateResult, StorageError>;

    /// Aggregates with `from <= timestamp < to`
    fn aggregates_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateResult>, StorageError>;

    /// Row counts
    fn stats(&self) -> StoreStats;
}

/// Row counts for the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub readings: usize,
    pub aggregates: usize,
}

/// Point-in-time copy of the whole store, used by snapshot persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreContents {
    pub readings: Vec<Reading>,
    pub aggregates: Vec<AggregateResult>,
    pub next_reading_id: u64,
    pub next_aggregate_id: u64,
}

/// In-memory reading store
pub struct StorageEngine {
    /// Raw readings indexed by id (ids are assigned in insertion order)
    readings: RwLock<BTreeMap<ReadingId, Reading>>,
    /// Aggregate results in insertion order
    aggregates: RwLock<Vec<AggregateResult>>,
    next_reading_id: AtomicU64,
    next_aggregate_id: AtomicU64,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            readings: RwLock::new(BTreeMap::new()),
            aggregates: RwLock::new(Vec::new()),
            next_reading_id: AtomicU64::new(1),
            next_aggregate_id: AtomicU64::new(1),
        }
    }

    /// Rebuild a store from a snapshot
    pub fn from_contents(contents: StoreContents) -> Self {
        let max_reading = contents.readings.iter().map(|r| r.id.0).max().unwrap_or(0);
        let max_aggregate = contents.aggregates.iter().map(|a| a.id.0).max().unwrap_or(0);

        let readings = contents
            .readings
            .into_iter()
            .map(|r| (r.id, r))
            .collect::<BTreeMap<_, _>>();

        let mut aggregates = contents.aggregates;
        aggregates.sort_by_key(|a| (a.timestamp, a.id));

        Self {
            readings: RwLock::new(readings),
            aggregates: RwLock::new(aggregates),
            // Never hand out an id that is already in the snapshot
            next_reading_id: AtomicU64::new(contents.next_reading_id.max(max_reading + 1)),
            next_aggregate_id: AtomicU64::new(contents.next_aggregate_id.max(max_aggregate + 1)),
        }
    }

    /// Copy out the full store
    pub fn contents(&self) -> StoreContents {
        // Hold both read locks so the copy is consistent
        let readings = self.readings.read();
        let aggregates = self.aggregates.read();

        StoreContents {
            readings: readings.values().cloned().collect(),
            aggregates: aggregates.clone(),
            next_reading_id: self.next_reading_id.load(Ordering::SeqCst),
            next_aggregate_id: self.next_aggregate_id.load(Ordering::SeqCst),
        }
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn in_range(ts: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |f| ts >= f) && to.map_or(true, |t| ts < t)
}

impl StorageEngine {
    fn append(
        &self,
        readings: &mut BTreeMap<ReadingId, Reading>,
        value: i64,
        timestamp: DateTime<Utc>,
    ) -> Reading {
        let id = ReadingId(self.next_reading_id.fetch_add(1, Ordering::SeqCst));
        let reading = Reading {
            id,
            value,
            timestamp,
        };
        readings.insert(id, reading.clone());
        reading
    }
}

impl ReadingStore for StorageEngine {
    fn record_reading(&self, value: i64) -> Result<Reading, StorageError> {
        let mut readings = self.readings.write();
        // Stamp under the write lock
        let timestamp = Utc::now();
        Ok(self.append(&mut readings, value, timestamp))
    }

    fn insert_reading(&self, value: i64, timestamp: DateTime<Utc>) -> Result<Reading, StorageError> {
        let mut readings = self.readings.write();
        Ok(self.append(&mut readings, value, timestamp))
    }

    fn get_reading(&self, id: ReadingId) -> Result<Option<Reading>, StorageError> {
        Ok(self.readings.read().get(&id).cloned())
    }

    fn readings_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StorageError> {
        let mut matched: Vec<Reading> = {
            let readings = self.readings.read();
            readings
                .values()
                .filter(|r| in_range(r.timestamp, from, to))
                .cloned()
                .collect()
        };
        matched.sort_by_key(|r| (r.timestamp, r.id));
        Ok(matched)
    }

    fn delete_readings(&self, ids: &[ReadingId]) -> Result<usize, StorageError> {
        let unique: HashSet<&ReadingId> = ids.iter().collect();
        let mut readings = self.readings.write();
        let deleted = unique
            .into_iter()
            .filter(|id| readings.remove(*id).is_some())
            .count();
        Ok(deleted)
    }

    fn insert_aggregate(
        &self,
        value: i64,
        status: Status,
        timestamp: DateTime<Utc>,
    ) -> Result<AggregateResult, StorageError> {
        let mut aggregates = self.aggregates.write();
        let result = AggregateResult {
            id: AggregateId(self.next_aggregate_id.fetch_add(1, Ordering::SeqCst)),
            value,
            status,
            timestamp,
        };

        // Keep ascending order even if a late tick lands behind an earlier one
        let pos = aggregates.partition_point(|a| a.timestamp <= timestamp);
        aggregates.insert(pos, result.clone());
        Ok(result)
    }

    fn aggregates_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateResult>, StorageError> {
        let aggregates = self.aggregates.read();
        Ok(aggregates
            .iter()
            .filter(|a| in_range(a.timestamp, from, to))
            .cloned()
            .collect())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            readings: self.readings.read().len(),
            aggregates: self.aggregates.read().len(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_insert_and_get_reading() {
        let engine = StorageEngine::new();

        let reading = engine.insert_reading(72, at(0)).unwrap();
        assert_eq!(reading.value, 72);

        let fetched = engine.get_reading(reading.id).unwrap().unwrap();
        assert_eq!(fetched, reading);
        assert!(engine.get_reading(ReadingId(999)).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let engine = StorageEngine::new();
        let a = engine.insert_reading(1, at(0)).unwrap();
        let b = engine.insert_reading(2, at(0)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_range_is_half_open_and_sorted() {
        let engine = StorageEngine::new();
        engine.insert_reading(3, at(30)).unwrap();
        engine.insert_reading(1, at(0)).unwrap();
        engine.insert_reading(2, at(10)).unwrap();
        engine.insert_reading(4, at(60)).unwrap();

        let window = engine.readings_in_range(Some(at(0)), Some(at(60))).unwrap();
        let values: Vec<i64> = window.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1, 2, 3]);

        let all = engine.readings_in_range(None, None).unwrap();
        assert_eq!(all.len(), 4);

        let tail = engine.readings_in_range(Some(at(30)), None).unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn test_delete_exact_ids() {
        let engine = StorageEngine::new();
        let a = engine.insert_reading(1, at(0)).unwrap();
        let b = engine.insert_reading(2, at(1)).unwrap();
        let c = engine.insert_reading(3, at(2)).unwrap();

        let deleted = engine.delete_readings(&[a.id, c.id, a.id]).unwrap();
        assert_eq!(deleted, 2);

        let remaining = engine.readings_in_range(None, None).unwrap();
        assert_eq!(remaining, vec![b]);

        // Already gone
        assert_eq!(engine.delete_readings(&[a.id]).unwrap(), 0);
    }

    #[test]
    fn test_aggregates_ordered_by_timestamp() {
        let engine = StorageEngine::new();
        engine.insert_aggregate(90, Status::Normal, at(120)).unwrap();
        engine.insert_aggregate(55, Status::Low, at(60)).unwrap();
        engine.insert_aggregate(110, Status::High, at(180)).unwrap();

        let all = engine.aggregates_in_range(None, None).unwrap();
        let values: Vec<i64> = all.iter().map(|a| a.value).collect();
        assert_eq!(values, vec![55, 90, 110]);

        let some = engine
            .aggregates_in_range(Some(at(60)), Some(at(60) + Duration::seconds(61)))
            .unwrap();
        assert_eq!(some.len(), 2);
    }

    #[test]
    fn test_stats() {
        let engine = StorageEngine::new();
        engine.insert_reading(1, at(0)).unwrap();
        engine.insert_reading(2, at(0)).unwrap();
        engine.insert_aggregate(2, Status::Low, at(60)).unwrap();

        assert_eq!(
            engine.stats(),
            StoreStats {
                readings: 2,
                aggregates: 1
            }
        );
    }

    #[test]
    fn test_contents_roundtrip_keeps_id_sequence() {
        let engine = StorageEngine::new();
        engine.insert_reading(70, at(0)).unwrap();
        let last = engine.insert_reading(71, at(1)).unwrap();
        engine.insert_aggregate(70, Status::Normal, at(60)).unwrap();

        let restored = StorageEngine::from_contents(engine.contents());
        assert_eq!(restored.stats(), engine.stats());

        let next = restored.insert_reading(72, at(2)).unwrap();
        assert!(next.id > last.id);
    }

    #[test]
    fn test_recorded_reading_is_visible_to_any_later_cutoff() {
        let engine = std::sync::Arc::new(StorageEngine::new());

        let writer = {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || {
                for v in 0..200 {
                    engine.record_reading(v).unwrap();
                }
            })
        };

        // Every reading stamped before a cutoff must already be visible to a
        // query issued after that cutoff was taken
        for _ in 0..200 {
            let cutoff = Utc::now();
            let seen: HashSet<ReadingId> = engine
                .readings_in_range(None, Some(cutoff))
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            let all = engine.readings_in_range(None, None).unwrap();
            for r in all.iter().filter(|r| r.timestamp < cutoff) {
                assert!(seen.contains(&r.id), "reading {} stamped before cutoff was missed", r.id);
            }
        }

        writer.join().unwrap();
        assert_eq!(engine.stats().readings, 200);
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;

        let engine = Arc::new(StorageEngine::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        engine.insert_reading(t * 100 + i, at(i)).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(engine.stats().readings, 400);
    }
}
