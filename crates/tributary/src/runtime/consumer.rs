//! Broker client seam used by the local runtime.

use std::time::Duration;

use async_trait::async_trait;

use tributary_core::{RuntimeError, SourceKind};

use crate::batch::Record;
use crate::runtime::store::CommittedOffsets;
use crate::source::StreamSourceSpec;

/// An open direct stream over a fixed set of topic partitions.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Return the records available now, waiting at most `max_wait` for the
    /// first one. An empty vector means nothing arrived in time.
    ///
    /// Must be cancel safe: dropping the future must not lose records that
    /// a later call would otherwise have returned.
    async fn poll(&mut self, max_wait: Duration) -> Result<Vec<Record>, RuntimeError>;
}

/// A broker client that yields one record at a time.
#[async_trait]
pub trait RecordStream: Send {
    /// Wait for the next record. Must be cancel safe.
    async fn next_record(&mut self) -> Result<Record, RuntimeError>;
}

/// Turns a [`RecordStream`] into a cancel safe [`BrokerConsumer`].
///
/// A poll waits for a first record, then keeps draining while records
/// arrive within `drain_timeout`. Drained records sit in a buffer until a
/// poll returns them, so a poll dropped mid-drain loses nothing.
pub struct DrainingConsumer<S> {
    stream: S,
    pending: Vec<Record>,
    drain_timeout: Duration,
    max_records: usize,
}

impl<S: RecordStream> DrainingConsumer<S> {
    pub fn new(stream: S, drain_timeout: Duration, max_records: usize) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            drain_timeout,
            max_records: max_records.max(1),
        }
    }
}

#[async_trait]
impl<S: RecordStream> BrokerConsumer for DrainingConsumer<S> {
    async fn poll(&mut self, max_wait: Duration) -> Result<Vec<Record>, RuntimeError> {
        // Leftovers from a dropped poll are returned without waiting again.
        if self.pending.is_empty() {
            match tokio::time::timeout(max_wait, self.stream.next_record()).await {
                Err(_) => return Ok(Vec::new()),
                Ok(record) => self.pending.push(record?),
            }
        }

        while self.pending.len() < self.max_records {
            match tokio::time::timeout(self.drain_timeout, self.stream.next_record()).await {
                Err(_) => break,
                Ok(record) => self.pending.push(record?),
            }
        }

        Ok(std::mem::take(&mut self.pending))
    }
}

/// Opens consumers for a source spec.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    /// Open a direct stream positioned at `offsets`. Partitions without a
    /// committed offset start where the spec's offset-reset policy says.
    async fn connect(
        &self,
        spec: &StreamSourceSpec,
        offsets: &CommittedOffsets,
    ) -> Result<Box<dyn BrokerConsumer>, RuntimeError>;
}

/// Dispatches to the broker client compiled into this build.
#[derive(Debug, Clone)]
pub struct DefaultConsumerFactory {
    group_id: String,
}

impl DefaultConsumerFactory {
    /// `group_id` is reported to the broker; no group coordination is used.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }
}

#[async_trait]
impl ConsumerFactory for DefaultConsumerFactory {
    async fn connect(
        &self,
        spec: &StreamSourceSpec,
        offsets: &CommittedOffsets,
    ) -> Result<Box<dyn BrokerConsumer>, RuntimeError> {
        match spec.kind() {
            #[cfg(feature = "kafka")]
            SourceKind::Kafka => {
                super::kafka::KafkaConsumerFactory::new(&self.group_id)
                    .connect(spec, offsets)
                    .await
            }
            #[cfg(not(feature = "kafka"))]
            SourceKind::Kafka => {
                let _ = (&self.group_id, offsets);
                Err(RuntimeError::SourceUnavailable {
                    kind: SourceKind::Kafka.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::batch::record;

    #[async_trait]
    impl RecordStream for mpsc::Receiver<Record> {
        async fn next_record(&mut self) -> Result<Record, RuntimeError> {
            self.recv().await.ok_or_else(|| RuntimeError::Broker {
                message: "stream closed".to_string(),
            })
        }
    }

    type ChannelConsumer = DrainingConsumer<mpsc::Receiver<Record>>;

    fn draining(drain_ms: u64, max_records: usize) -> (mpsc::Sender<Record>, ChannelConsumer) {
        let (tx, rx) = mpsc::channel(16);
        let consumer = DrainingConsumer::new(rx, Duration::from_millis(drain_ms), max_records);
        (tx, consumer)
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let (_tx, mut consumer) = draining(5, 10);
        let records = consumer.poll(Duration::from_millis(10)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_poll_keeps_drained_records() {
        let (tx, mut consumer) = draining(500, 10);
        tx.send(record("orders", 0, 0, "a")).await.unwrap();

        // The first record is taken at once, then the poll is dropped while draining.
        let cut = tokio::time::timeout(
            Duration::from_millis(50),
            consumer.poll(Duration::from_secs(5)),
        )
        .await;
        assert!(cut.is_err());

        tx.send(record("orders", 0, 1, "b")).await.unwrap();
        let records = consumer.poll(Duration::from_secs(5)).await.unwrap();
        let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, [0, 1]);
    }

    #[tokio::test]
    async fn test_poll_caps_batch_size() {
        let (tx, mut consumer) = draining(20, 3);
        for offset in 0..5 {
            tx.send(record("orders", 0, offset, "x")).await.unwrap();
        }

        let first = consumer.poll(Duration::from_secs(1)).await.unwrap();
        let second = consumer.poll(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.iter().map(|r| r.offset).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(second.iter().map(|r| r.offset).collect::<Vec<_>>(), [3, 4]);
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn test_kafka_unavailable_without_feature() {
        use tributary_core::{JobConfiguration, RawConfig};

        use crate::graph::StreamGraph;
        use crate::source::StreamSourceFactory;

        let raw: RawConfig = [
            ("topic", "orders"),
            ("maxWaitTime", "100"),
            ("metadataBrokerList", "localhost:9092"),
            ("sdc.id", "job1"),
            ("cluster.pipeline.name", "p1"),
            ("cluster.source.name", "kafka"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = JobConfiguration::resolve(&raw).unwrap();
        let mut graph = StreamGraph::new(Duration::from_millis(100));
        let spec = StreamSourceFactory::build("kafka", &config, &mut graph).unwrap();

        let result = DefaultConsumerFactory::new("tributary-job1")
            .connect(&spec, &CommittedOffsets::default())
            .await;
        assert!(matches!(result, Err(RuntimeError::SourceUnavailable { .. })));
    }
}
