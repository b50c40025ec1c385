//! Round snapshot persistence.
//!
//! Snapshots are whole-value replacements keyed by round id: the runner
//! serializes the machine after every applied event and a crash recovers by
//! restoring the last stored snapshot and re-reading the log from the
//! round's cursor.

use crate::error::RelayError;
use async_trait::async_trait;
use covenant_core::RoundId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

/// What the store keeps per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRound {
    /// Version-tagged machine snapshot (see `RoundMachine::dump`).
    pub machine: Vec<u8>,
    /// Offset of the last applied record; replayed offsets at or below this
    /// are no-ops.
    pub last_offset: Option<u64>,
}

/// Keyed whole-snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, round_id: &RoundId) -> Result<Option<StoredRound>, RelayError>;

    /// Atomically replace the round's snapshot.
    async fn store(&self, round_id: &RoundId, round: &StoredRound) -> Result<(), RelayError>;

    /// Every round the store knows, for the ticker.
    async fn list_rounds(&self) -> Result<Vec<RoundId>, RelayError>;
}

/// HashMap-backed store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rounds: RwLock<HashMap<RoundId, StoredRound>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, round_id: &RoundId) -> Result<Option<StoredRound>, RelayError> {
        Ok(self.rounds.read().get(round_id).cloned())
    }

    async fn store(&self, round_id: &RoundId, round: &StoredRound) -> Result<(), RelayError> {
        self.rounds.write().insert(*round_id, round.clone());
        Ok(())
    }

    async fn list_rounds(&self) -> Result<Vec<RoundId>, RelayError> {
        let mut ids: Vec<RoundId> = self.rounds.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One file per round under a directory; replacement is write-to-temp then
/// rename so a crash never leaves a torn snapshot.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| RelayError::SnapshotStore(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, round_id: &RoundId) -> PathBuf {
        self.dir.join(format!("{round_id}.round"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, round_id: &RoundId) -> Result<Option<StoredRound>, RelayError> {
        let path = self.path_for(round_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RelayError::SnapshotStore(e.to_string())),
        };
        let round =
            bincode::deserialize(&bytes).map_err(|e| RelayError::SnapshotStore(e.to_string()))?;
        Ok(Some(round))
    }

    async fn store(&self, round_id: &RoundId, round: &StoredRound) -> Result<(), RelayError> {
        let bytes =
            bincode::serialize(round).map_err(|e| RelayError::SnapshotStore(e.to_string()))?;
        let path = self.path_for(round_id);
        let tmp = path.with_extension("round.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|e| RelayError::SnapshotStore(e.to_string()))
    }

    async fn list_rounds(&self) -> Result<Vec<RoundId>, RelayError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| RelayError::SnapshotStore(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RelayError::SnapshotStore(e.to_string()))?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".round")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<RoundId>() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(tag: u8) -> StoredRound {
        StoredRound {
            machine: vec![tag; 8],
            last_offset: Some(tag as u64),
        }
    }

    #[tokio::test]
    async fn memory_store_replaces_whole_snapshots() {
        let store = MemorySnapshotStore::new();
        let id = RoundId::from_bytes([1; 16]);
        assert!(store.load(&id).await.unwrap().is_none());

        store.store(&id, &stored(1)).await.unwrap();
        store.store(&id, &stored(2)).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), Some(stored(2)));
        assert_eq!(store.list_rounds().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn file_store_round_trips_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).unwrap();
        let a = RoundId::from_bytes([1; 16]);
        let b = RoundId::from_bytes([2; 16]);

        store.store(&a, &stored(1)).await.unwrap();
        store.store(&b, &stored(2)).await.unwrap();
        store.store(&a, &stored(3)).await.unwrap();

        assert_eq!(store.load(&a).await.unwrap(), Some(stored(3)));
        assert_eq!(store.load(&b).await.unwrap(), Some(stored(2)));

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list_rounds().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn file_store_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), b"not a snapshot").unwrap();
        let store = FileSnapshotStore::new(dir.path()).unwrap();
        assert!(store.list_rounds().await.unwrap().is_empty());
    }
}
