//! Construction of the broker consumption source for a new job.
//!
//! The factory turns the resolved properties into a [`StreamSourceSpec`] and
//! attaches it to a freshly built [`StreamGraph`] as a direct stream. It only
//! ever runs on the create path; a resumed job carries its spec in the
//! persisted graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::info;

use tributary_core::config::{AUTO_OFFSET_RESET, METADATA_BROKER_LIST, SourceKind, TOPIC};
use tributary_core::error::{ConfigError, EmptyListEntrySnafu};
use tributary_core::JobConfiguration;

use crate::graph::StreamGraph;

/// Starting position used when no committed offset exists.
///
/// Kept verbatim; the broker client is the one that interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetReset(String);

impl OffsetReset {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a broker client needs to open a direct stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSourceSpec {
    kind: SourceKind,
    brokers: Vec<String>,
    topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset_reset: Option<OffsetReset>,
}

impl StreamSourceSpec {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Topic names in first-occurrence order, without duplicates.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn offset_reset(&self) -> Option<&OffsetReset> {
        self.offset_reset.as_ref()
    }
}

/// Builds and attaches broker sources.
pub struct StreamSourceFactory;

impl StreamSourceFactory {
    /// Build the source named by `source_kind` and attach it to `graph`.
    ///
    /// Fails with [`ConfigError::UnsupportedSource`] for an unknown kind and
    /// leaves the graph untouched on any error.
    pub fn build(
        source_kind: &str,
        config: &JobConfiguration,
        graph: &mut StreamGraph,
    ) -> Result<StreamSourceSpec, ConfigError> {
        let kind: SourceKind = source_kind.parse()?;

        let spec = match kind {
            SourceKind::Kafka => StreamSourceSpec {
                kind,
                brokers: split_list(METADATA_BROKER_LIST, config.get(METADATA_BROKER_LIST)?)?,
                topics: topic_set(config.get(TOPIC)?)?,
                offset_reset: config
                    .get_optional(AUTO_OFFSET_RESET)
                    .map(|value| OffsetReset(value.to_string())),
            },
        };

        info!(
            kind = %spec.kind,
            brokers = ?spec.brokers,
            topics = ?spec.topics,
            offset_reset = spec.offset_reset.as_ref().map(OffsetReset::as_str),
            "Creating direct stream"
        );

        graph.attach_direct_stream(spec.clone());
        Ok(spec)
    }
}

/// Split a comma-separated topic list into an ordered set.
///
/// Entries are not trimmed: a topic named ` orders` is a different topic.
pub fn topic_set(value: &str) -> Result<Vec<String>, ConfigError> {
    let mut topics: Vec<String> = Vec::new();
    for topic in split_list(TOPIC, value)? {
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    Ok(topics)
}

fn split_list(key: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    value
        .split(',')
        .map(|entry| {
            ensure!(!entry.is_empty(), EmptyListEntrySnafu { key, value });
            Ok(entry.to_string())
        })
        .collect()
}
