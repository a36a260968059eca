//! In-memory key-value store with sweep-based compaction and snapshots.
//!
//! The store stands in for an LSM engine: point lookups over an ordered map,
//! a compaction filter applied by periodic sweeps instead of background
//! merges, and durability via CRC-checked snapshots written with an atomic
//! temp-file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{CompactionFilter, StorageError, Store};

/// Magic bytes between the snapshot payload and the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"FGS1";

/// Ordered in-memory key-value store.
///
/// All entries live in a single map guarded by a read-write lock. A
/// registered [`CompactionFilter`] is consulted only by
/// [`compact`](MemoryStore::compact); the hot get/put path never runs it.
pub struct MemoryStore {
    /// Stored entries, ordered by encoded key
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Eviction predicate applied by compaction sweeps
    filter: Option<Box<dyn CompactionFilter>>,
}

impl MemoryStore {
    /// Create an empty store with no compaction filter.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            filter: None,
        }
    }

    /// Create an empty store with `filter` registered for compaction sweeps.
    pub fn with_compaction_filter(filter: Box<dyn CompactionFilter>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            filter: Some(filter),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Apply the registered compaction filter to every entry, removing the
    /// ones it marks for eviction.
    ///
    /// Returns the number of entries dropped. A store without a filter
    /// sweeps nothing.
    pub fn compact(&self) -> usize {
        let Some(filter) = &self.filter else {
            return 0;
        };
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, value| !filter.evict(key, value));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(filter = filter.name(), evicted, "compaction sweep complete");
        }
        evicted
    }

    /// Persist all entries to `path`.
    ///
    /// Layout: `[bincode payload][magic "FGS1"][CRC32 BE]`. The snapshot is
    /// written to a temp file and renamed into place so a crash mid-write
    /// never leaves a torn file at `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StorageError> {
        let entries = self.entries.read();
        let count = entries.len();
        let payload = bincode::serialize(&*entries)
            .map_err(|e| StorageError::SnapshotCodec(e.to_string()))?;
        drop(entries);

        let crc = crc32fast::hash(&payload);
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&payload);
        out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &out)?;
        fs::rename(&tmp_path, path)?;

        info!(
            path = %path.display(),
            entries = count,
            bytes = payload.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load entries from a snapshot written by
    /// [`save_snapshot`](MemoryStore::save_snapshot), replacing the current
    /// contents. A missing file loads nothing and returns 0.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, StorageError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
            return Err(StorageError::SnapshotCorrupted(
                "missing CRC footer".to_string(),
            ));
        }
        let payload = &raw[..raw.len() - 8];
        let mut stored_crc = [0u8; 4];
        stored_crc.copy_from_slice(&raw[raw.len() - 4..]);
        let stored_crc = u32::from_be_bytes(stored_crc);
        let computed_crc = crc32fast::hash(payload);
        if stored_crc != computed_crc {
            return Err(StorageError::SnapshotCorrupted(format!(
                "CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        let map: BTreeMap<Vec<u8>, Vec<u8>> = bincode::deserialize(payload)
            .map_err(|e| StorageError::SnapshotCodec(e.to_string()))?;
        let count = map.len();
        *self.entries.write() = map;
        Ok(count)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
