//! Kafka direct stream backed by librdkafka.
//!
//! Partitions are assigned explicitly instead of subscribing through a
//! consumer group, and nothing is committed to the broker: the job's own
//! checkpoint directory owns the offsets.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use tributary_core::RuntimeError;

use crate::batch::Record;
use crate::runtime::consumer::{BrokerConsumer, ConsumerFactory, DrainingConsumer, RecordStream};
use crate::runtime::store::CommittedOffsets;
use crate::source::StreamSourceSpec;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on records returned by one poll.
const MAX_POLL_RECORDS: usize = 10_000;
/// How long a poll keeps draining once the first record arrived.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(5);

fn broker_error(e: KafkaError) -> RuntimeError {
    RuntimeError::Broker {
        message: e.to_string(),
    }
}

/// Opens rdkafka consumers for Kafka source specs.
#[derive(Debug, Clone)]
pub struct KafkaConsumerFactory {
    group_id: String,
}

impl KafkaConsumerFactory {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }

    fn client_config(&self, spec: &StreamSourceSpec) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", spec.brokers().join(","))
            // Required by librdkafka but unused without subscribe().
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");
        if let Some(reset) = spec.offset_reset() {
            config.set("auto.offset.reset", reset.as_str());
        }
        config
    }
}

#[async_trait]
impl ConsumerFactory for KafkaConsumerFactory {
    async fn connect(
        &self,
        spec: &StreamSourceSpec,
        offsets: &CommittedOffsets,
    ) -> Result<Box<dyn BrokerConsumer>, RuntimeError> {
        let consumer: StreamConsumer = self.client_config(spec).create().map_err(broker_error)?;
        let topics = spec.topics().to_vec();
        let offsets = offsets.clone();
        let reset = reset_offset(spec)?;

        // Metadata requests block the calling thread.
        let consumer =
            tokio::task::spawn_blocking(move || assign(consumer, &topics, &offsets, reset))
            .await
            .map_err(|source| RuntimeError::TaskJoin { source })??;

        Ok(Box::new(DrainingConsumer::new(
            KafkaRecords(consumer),
            DRAIN_TIMEOUT,
            MAX_POLL_RECORDS,
        )))
    }
}

/// Start position for partitions with no committed offset. Resolved here
/// rather than via `Offset::Stored`, which would consult the group
/// coordinator.
fn reset_offset(spec: &StreamSourceSpec) -> Result<Offset, RuntimeError> {
    match spec.offset_reset().map(|reset| reset.as_str()) {
        None | Some("latest" | "largest" | "end") => Ok(Offset::End),
        Some("earliest" | "smallest" | "beginning") => Ok(Offset::Beginning),
        Some(other) => Err(RuntimeError::Broker {
            message: format!(
                "Invalid value \"{other}\" for configuration property \"auto.offset.reset\""
            ),
        }),
    }
}

fn assign(
    consumer: StreamConsumer,
    topics: &[String],
    offsets: &CommittedOffsets,
    reset: Offset,
) -> Result<StreamConsumer, RuntimeError> {
    let mut assignment = TopicPartitionList::new();

    for topic in topics {
        let metadata = consumer
            .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
            .map_err(broker_error)?;
        let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Err(RuntimeError::Broker {
                message: format!("No metadata for topic {topic}"),
            });
        };
        if let Some(err) = topic_metadata.error() {
            return Err(RuntimeError::Broker {
                message: format!("Topic {topic}: {err:?}"),
            });
        }

        for partition in topic_metadata.partitions() {
            let offset = offsets
                .next_offset(topic, partition.id())
                .map_or(reset, Offset::Offset);
            assignment
                .add_partition_offset(topic, partition.id(), offset)
                .map_err(broker_error)?;
        }
    }

    consumer.assign(&assignment).map_err(broker_error)?;
    info!(
        partitions = assignment.count(),
        topics = ?topics,
        "Assigned Kafka partitions"
    );
    Ok(consumer)
}

/// Direct stream over the assigned partitions.
struct KafkaRecords(StreamConsumer);

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice),
        timestamp: message.timestamp().to_millis(),
    }
}

#[async_trait]
impl RecordStream for KafkaRecords {
    async fn next_record(&mut self) -> Result<Record, RuntimeError> {
        let message = self.0.recv().await.map_err(broker_error)?;
        Ok(to_record(&message))
    }
}
