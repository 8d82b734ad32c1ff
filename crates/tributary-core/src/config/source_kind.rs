//! Supported source technologies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{METADATA_BROKER_LIST, TOPIC};
use crate::error::ConfigError;

/// The broker technology a job consumes from.
///
/// Parsed case-insensitively from `cluster.source.name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Kafka, consumed as a direct stream.
    Kafka,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Kafka => "kafka",
        }
    }

    /// Keys that must be present when this source is selected.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Kafka => &[TOPIC, METADATA_BROKER_LIST],
        }
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("kafka") {
            Ok(SourceKind::Kafka)
        } else {
            Err(ConfigError::UnsupportedSource {
                value: value.to_string(),
            })
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
