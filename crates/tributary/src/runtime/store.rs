//! Persistent checkpoint state inside a job's checkpoint directory.
//!
//! Two files live next to each other:
//! - `metadata.json` holds the serialized [`StreamGraph`]; its presence is
//!   what makes a job resumable.
//! - `offsets.json` holds the [`CommittedOffsets`] and is rewritten after
//!   every micro-batch.
//!
//! # Atomic Writes
//!
//! Both files are written to `<name>.tmp` first and renamed into place, so a
//! crash never leaves a partially written checkpoint behind.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;

use tributary_core::error::{
    CorruptCheckpointSnafu, ReadCheckpointSnafu, SerializeCheckpointSnafu, StorageError,
    WriteCheckpointSnafu,
};

use crate::batch::MicroBatch;
use crate::graph::StreamGraph;

/// File holding the serialized execution graph.
pub const METADATA_FILE: &str = "metadata.json";
/// File holding committed consumption offsets.
pub const OFFSETS_FILE: &str = "offsets.json";

/// Consumption progress of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOffsets {
    /// Next offset to read, per topic and partition.
    #[serde(default)]
    partitions: BTreeMap<String, BTreeMap<i32, i64>>,
    #[serde(default)]
    batches_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl CommittedOffsets {
    /// The next offset to read from a partition, if one was ever committed.
    pub fn next_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions.get(topic)?.get(&partition).copied()
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Iterate over `(topic, partition, next offset)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.partitions.iter().flat_map(|(topic, partitions)| {
            partitions
                .iter()
                .map(move |(partition, offset)| (topic.as_str(), *partition, *offset))
        })
    }

    /// Account for a processed batch.
    ///
    /// Offsets only move forward; a record below the committed position
    /// leaves it unchanged.
    pub fn record_batch(&mut self, batch: &MicroBatch) {
        for record in batch.records() {
            let next = self
                .partitions
                .entry(record.topic.clone())
                .or_default()
                .entry(record.partition)
                .or_insert(0);
            *next = (*next).max(record.offset + 1);
        }
        self.batches_completed += 1;
        self.updated_at = Some(batch.time());
    }
}

/// Reads and writes the checkpoint files of one job.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the persisted graph. `None` means no prior job state.
    pub async fn load_graph(&self) -> Result<Option<StreamGraph>, StorageError> {
        read_json(&self.dir.join(METADATA_FILE)).await
    }

    pub async fn save_graph(&self, graph: &StreamGraph) -> Result<(), StorageError> {
        write_json(&self.dir.join(METADATA_FILE), graph).await
    }

    pub async fn load_offsets(&self) -> Result<Option<CommittedOffsets>, StorageError> {
        read_json(&self.dir.join(OFFSETS_FILE)).await
    }

    pub async fn save_offsets(&self, offsets: &CommittedOffsets) -> Result<(), StorageError> {
        write_json(&self.dir.join(OFFSETS_FILE), offsets).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No checkpoint file");
            return Ok(None);
        }
        Err(source) => return Err(source).context(ReadCheckpointSnafu { path }),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .context(CorruptCheckpointSnafu { path })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value).context(SerializeCheckpointSnafu)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json)
        .await
        .context(WriteCheckpointSnafu { path: &tmp })?;
    tokio::fs::rename(&tmp, path)
        .await
        .context(WriteCheckpointSnafu { path })?;

    debug!(path = %path.display(), "Wrote checkpoint file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::record;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_mean_no_state() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load_graph().await.unwrap().is_none());
        assert!(store.load_offsets().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_graph_persists() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut graph = StreamGraph::new(Duration::from_millis(200));
        graph.checkpoint(dir.path());

        store.save_graph(&graph).await.unwrap();
        assert_eq!(store.load_graph().await.unwrap(), Some(graph));
        assert!(!dir.path().join("metadata.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), b"{ not json").unwrap();

        let err = CheckpointStore::new(dir.path())
            .load_graph()
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CorruptCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_offsets_persist() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut offsets = CommittedOffsets::default();
        offsets.record_batch(&MicroBatch::new(
            0,
            Utc::now(),
            vec![record("orders", 0, 4, "a"), record("orders", 1, 9, "b")],
        ));
        store.save_offsets(&offsets).await.unwrap();

        let loaded = store.load_offsets().await.unwrap().unwrap();
        assert_eq!(loaded, offsets);
        assert_eq!(loaded.next_offset("orders", 0), Some(5));
        assert_eq!(loaded.next_offset("orders", 1), Some(10));
        assert_eq!(loaded.next_offset("orders", 2), None);
    }

    #[test]
    fn test_record_batch_only_moves_forward() {
        let mut offsets = CommittedOffsets::default();
        offsets.record_batch(&MicroBatch::new(
            0,
            Utc::now(),
            vec![record("t", 0, 10, "a"), record("t", 0, 3, "b")],
        ));
        offsets.record_batch(&MicroBatch::new(1, Utc::now(), Vec::new()));

        assert_eq!(offsets.next_offset("t", 0), Some(11));
        assert_eq!(offsets.batches_completed(), 2);
        assert!(offsets.updated_at().is_some());
        assert_eq!(offsets.iter().collect::<Vec<_>>(), [("t", 0, 11)]);
    }
}
