//! Records and micro-batches handed to the pipeline.
//!
//! The pipeline engine is an opaque collaborator: it receives one
//! [`MicroBatch`] per interval through a [`BatchHandler`] and returns once the
//! batch is processed. Offsets are committed only after the handler returns
//! `Ok`, so a failed or interrupted batch is redelivered on resume.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Error type returned by batch handlers.
pub type BatchHandlerError = Box<dyn Error + Send + Sync>;

/// A single message read from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    /// Broker timestamp in milliseconds since the epoch, when known.
    pub timestamp: Option<i64>,
}

/// The records consumed during one batch interval.
#[derive(Debug, Clone)]
pub struct MicroBatch {
    id: u64,
    time: DateTime<Utc>,
    records: Vec<Record>,
}

impl MicroBatch {
    pub fn new(id: u64, time: DateTime<Utc>, records: Vec<Record>) -> Self {
        Self { id, time, records }
    }

    /// Sequence number, counted across restarts of the same job.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the batch was cut.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `[first, last]` offsets seen per topic partition.
    pub fn offset_ranges(&self) -> BTreeMap<(String, i32), (i64, i64)> {
        let mut ranges = BTreeMap::new();
        for record in &self.records {
            ranges
                .entry((record.topic.clone(), record.partition))
                .and_modify(|(first, last): &mut (i64, i64)| {
                    *first = (*first).min(record.offset);
                    *last = (*last).max(record.offset);
                })
                .or_insert((record.offset, record.offset));
        }
        ranges
    }
}

impl fmt::Display for MicroBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} ({} records)", self.id, self.records.len())
    }
}

/// Per-batch callback into the pipeline engine.
///
/// Called once per batch interval, including for empty batches, and never
/// concurrently for the same job.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &MicroBatch) -> Result<(), BatchHandlerError>;
}

/// Adapts a synchronous closure into a [`BatchHandler`].
pub struct FnBatchHandler<F> {
    f: F,
}

/// Wrap a closure as a batch handler.
pub fn handler_fn<F>(f: F) -> FnBatchHandler<F>
where
    F: Fn(&MicroBatch) -> Result<(), BatchHandlerError> + Send + Sync,
{
    FnBatchHandler { f }
}

#[async_trait]
impl<F> BatchHandler for FnBatchHandler<F>
where
    F: Fn(&MicroBatch) -> Result<(), BatchHandlerError> + Send + Sync,
{
    async fn handle(&self, batch: &MicroBatch) -> Result<(), BatchHandlerError> {
        (self.f)(batch)
    }
}

/// Handler that only logs what each batch contained.
///
/// Used by the standalone binary when no pipeline engine is attached.
pub struct LoggingBatchHandler {
    job: String,
}

impl LoggingBatchHandler {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }
}

#[async_trait]
impl BatchHandler for LoggingBatchHandler {
    async fn handle(&self, batch: &MicroBatch) -> Result<(), BatchHandlerError> {
        if batch.is_empty() {
            debug!(target = %self.job, batch = batch.id(), "Empty batch");
            return Ok(());
        }

        for ((topic, partition), (first, last)) in batch.offset_ranges() {
            info!(
                target = %self.job,
                batch = batch.id(),
                topic,
                partition,
                first_offset = first,
                last_offset = last,
                "Received records"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn record(topic: &str, partition: i32, offset: i64, payload: &str) -> Record {
    Record {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        payload: Some(Bytes::copy_from_slice(payload.as_bytes())),
        timestamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_offset_ranges() {
        let batch = MicroBatch::new(
            3,
            Utc::now(),
            vec![
                record("orders", 0, 10, "a"),
                record("orders", 0, 12, "b"),
                record("orders", 1, 4, "c"),
                record("payments", 0, 7, "d"),
                record("orders", 0, 11, "e"),
            ],
        );

        let ranges = batch.offset_ranges();
        assert_eq!(ranges[&("orders".to_string(), 0)], (10, 12));
        assert_eq!(ranges[&("orders".to_string(), 1)], (4, 4));
        assert_eq!(ranges[&("payments".to_string(), 0)], (7, 7));
        assert_eq!(batch.to_string(), "batch 3 (5 records)");
    }

    #[test]
    fn test_empty_batch() {
        let batch = MicroBatch::new(0, Utc::now(), Vec::new());
        assert!(batch.is_empty());
        assert!(batch.offset_ranges().is_empty());
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let calls = AtomicUsize::new(0);
        let handler = handler_fn(|batch: &MicroBatch| {
            calls.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        });

        let batch = MicroBatch::new(0, Utc::now(), vec![record("t", 0, 0, "x")]);
        handler.handle(&batch).await.unwrap();
        handler.handle(&batch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_fn_error() {
        let handler = handler_fn(|_: &MicroBatch| Err("sink unavailable".into()));
        let batch = MicroBatch::new(0, Utc::now(), Vec::new());
        let err = handler.handle(&batch).await.unwrap_err();
        assert_eq!(err.to_string(), "sink unavailable");
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_everything() {
        let handler = LoggingBatchHandler::new("p1");
        let batch = MicroBatch::new(1, Utc::now(), vec![record("t", 0, 5, "x")]);
        handler.handle(&batch).await.unwrap();
        handler
            .handle(&MicroBatch::new(2, Utc::now(), Vec::new()))
            .await
            .unwrap();
    }
}
