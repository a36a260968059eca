//! Storage layer: the key-value store contract and the in-memory engine.
//!
//! The rate limit handler treats storage as an opaque point-lookup store.
//! Engines accept a [`CompactionFilter`] at construction time; entries the
//! filter marks for eviction are reclaimed during background sweeps.

mod memory;

pub use memory::MemoryStore;

use thiserror::Error;

/// Errors surfaced by storage engines.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A snapshot file failed its integrity check
    #[error("snapshot corrupted: {0}")]
    SnapshotCorrupted(String),

    /// Snapshot (de)serialization failure
    #[error("snapshot codec error: {0}")]
    SnapshotCodec(String),

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point-lookup key-value store consumed by the rate limit handler.
///
/// Implementations must be safe to call from many threads at once; the
/// handler layers per-key write exclusion on top with its own lock stripes,
/// so the store only needs per-call consistency.
pub trait Store: Send + Sync + 'static {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
}

/// Eviction predicate applied to entries during compaction sweeps.
///
/// Dropping an entry must be semantically invisible to readers; the filter
/// inspects values but never rewrites them.
pub trait CompactionFilter: Send + Sync + 'static {
    /// Filter name, used in sweep logging.
    fn name(&self) -> &'static str;

    /// Return `true` to drop the entry, `false` to retain it.
    fn evict(&self, key: &[u8], value: &[u8]) -> bool;
}
