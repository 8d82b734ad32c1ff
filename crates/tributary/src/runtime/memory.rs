//! In-process broker with Kafka-like topic/partition/offset semantics.
//!
//! Used to run jobs without a broker cluster, mainly in tests. Every
//! [`MemoryBroker`] clone shares the same log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use tributary_core::RuntimeError;

use crate::batch::Record;
use crate::runtime::consumer::{BrokerConsumer, ConsumerFactory};
use crate::runtime::store::CommittedOffsets;
use crate::source::StreamSourceSpec;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
    timestamp: i64,
}

type Log = HashMap<String, Vec<Vec<StoredRecord>>>;

#[derive(Default)]
struct Shared {
    topics: Mutex<Log>,
    appended: Notify,
    connections: AtomicUsize,
}

impl Shared {
    fn log(&self) -> MutexGuard<'_, Log> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` partitions, or grow it to that many.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut log = self.shared.log();
        let entry = log.entry(topic.to_string()).or_default();
        if entry.len() < partitions {
            entry.resize_with(partitions, Vec::new);
        }
    }

    /// Append a record and return its offset. Missing topics and partitions
    /// are created on demand.
    ///
    /// # Panics
    ///
    /// If `partition` is negative.
    pub fn produce(&self, topic: &str, partition: i32, payload: impl Into<Bytes>) -> i64 {
        self.append(topic, partition, None, payload.into())
    }

    /// Append a keyed record and return its offset.
    pub fn produce_keyed(
        &self,
        topic: &str,
        partition: i32,
        key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> i64 {
        self.append(topic, partition, Some(key.into()), payload.into())
    }

    /// Offset the next produced record on a partition will get.
    pub fn end_offset(&self, topic: &str, partition: i32) -> i64 {
        self.shared
            .log()
            .get(topic)
            .and_then(|partitions| partitions.get(usize::try_from(partition).ok()?))
            .map_or(0, |records| records.len() as i64)
    }

    /// Number of consumers opened so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    fn append(&self, topic: &str, partition: i32, key: Option<Bytes>, payload: Bytes) -> i64 {
        let Ok(index) = usize::try_from(partition) else {
            panic!("cannot produce to negative partition {partition} of topic {topic}");
        };
        let offset = {
            let mut log = self.shared.log();
            let partitions = log.entry(topic.to_string()).or_default();
            if partitions.len() <= index {
                partitions.resize_with(index + 1, Vec::new);
            }
            let records = &mut partitions[index];
            records.push(StoredRecord {
                key,
                payload,
                timestamp: Utc::now().timestamp_millis(),
            });
            records.len() as i64 - 1
        };
        self.shared.appended.notify_waiters();
        offset
    }
}

#[async_trait]
impl ConsumerFactory for MemoryBroker {
    async fn connect(
        &self,
        spec: &StreamSourceSpec,
        offsets: &CommittedOffsets,
    ) -> Result<Box<dyn BrokerConsumer>, RuntimeError> {
        let mut positions = Vec::new();
        {
            let log = self.shared.log();
            for topic in spec.topics() {
                let partitions = log.get(topic).ok_or_else(|| RuntimeError::Broker {
                    message: format!("Unknown topic or partition: {topic}"),
                })?;

                for (index, records) in partitions.iter().enumerate() {
                    let partition = index as i32;
                    let end = records.len() as i64;
                    let start = match offsets.next_offset(topic, partition) {
                        Some(next) => next.min(end),
                        None => reset_position(spec, end)?,
                    };
                    positions.push(Position {
                        topic: topic.clone(),
                        partition,
                        next: start,
                    });
                }
            }
        }

        self.shared.connections.fetch_add(1, Ordering::SeqCst);
        debug!(partitions = positions.len(), "Memory consumer connected");

        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            positions,
        }))
    }
}

/// Start position for a partition with nothing committed.
fn reset_position(spec: &StreamSourceSpec, end: i64) -> Result<i64, RuntimeError> {
    match spec.offset_reset().map(|reset| reset.as_str()) {
        None | Some("latest" | "largest" | "end") => Ok(end),
        Some("earliest" | "smallest" | "beginning") => Ok(0),
        Some(other) => Err(RuntimeError::Broker {
            message: format!(
                "Invalid value \"{other}\" for configuration property \"auto.offset.reset\""
            ),
        }),
    }
}

struct Position {
    topic: String,
    partition: i32,
    next: i64,
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    positions: Vec<Position>,
}

impl MemoryConsumer {
    fn drain(&mut self) -> Vec<Record> {
        let log = self.shared.log();
        let mut out = Vec::new();

        for position in &mut self.positions {
            let Some(records) = log
                .get(&position.topic)
                .and_then(|partitions| partitions.get(position.partition as usize))
            else {
                continue;
            };

            let start = usize::try_from(position.next).unwrap_or(0);
            for (index, stored) in records.iter().enumerate().skip(start) {
                out.push(Record {
                    topic: position.topic.clone(),
                    partition: position.partition,
                    offset: index as i64,
                    key: stored.key.clone(),
                    payload: Some(stored.payload.clone()),
                    timestamp: Some(stored.timestamp),
                });
            }
            position.next = position.next.max(records.len() as i64);
        }
        out
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll(&mut self, max_wait: Duration) -> Result<Vec<Record>, RuntimeError> {
        let deadline = Instant::now() + max_wait;
        let shared = Arc::clone(&self.shared);

        loop {
            // Registered before draining so an append in between still wakes us.
            let appended = shared.appended.notified();
            let records = self.drain();
            if !records.is_empty() {
                return Ok(records);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}
