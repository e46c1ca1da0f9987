//! Reading and aggregate storage

pub mod engine;
pub mod persistence;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{ReadingStore, StorageEngine, StorageError, StoreContents, StoreStats};
pub use persistence::{PersistenceConfig, PersistenceError, SnapshotManager, SnapshotWorker};
