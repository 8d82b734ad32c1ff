//! Validation and normalization of job properties.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use snafu::prelude::*;

use super::{MAX_WAIT_TIME, REQUIRED_KEYS, SOURCE_NAME, SourceKind};
use crate::error::{BlankValueSnafu, ConfigError, InvalidDurationSnafu, MissingKeySnafu};

/// Untrimmed properties as loaded from files and overrides.
pub type RawConfig = HashMap<String, String>;

/// Validated, trimmed job properties.
///
/// Built once by [`JobConfiguration::resolve`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfiguration {
    values: HashMap<String, String>,
}

impl JobConfiguration {
    /// Trim every value and check that all required keys are present and
    /// non-blank.
    ///
    /// Keys required by the selected source technology are checked too when
    /// that technology is recognised. An unrecognised `cluster.source.name` is
    /// left for the source factory to reject.
    pub fn resolve(raw: &RawConfig) -> Result<Self, ConfigError> {
        let values = raw
            .iter()
            .map(|(key, value)| (key.clone(), value.trim().to_string()))
            .collect();
        let config = Self { values };

        for key in REQUIRED_KEYS {
            config.get(key)?;
        }

        if let Ok(kind) = config.get(SOURCE_NAME)?.parse::<SourceKind>() {
            for key in kind.required_keys() {
                config.get(key)?;
            }
        }

        Ok(config)
    }

    /// Look up a required value.
    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self
            .values
            .get(key)
            .context(MissingKeySnafu { key })?;
        ensure!(!value.is_empty(), BlankValueSnafu { key });
        Ok(value.as_str())
    }

    /// Look up an optional value; blank counts as absent.
    pub fn get_optional(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// The micro-batch interval from `maxWaitTime`.
    pub fn batch_interval(&self) -> Result<Duration, ConfigError> {
        let raw = self.get(MAX_WAIT_TIME)?;
        let millis = parse_duration(MAX_WAIT_TIME, raw)?;
        if millis == 0 {
            return Err(ConfigError::ZeroInterval {
                key: MAX_WAIT_TIME.to_string(),
                value: raw.to_string(),
            });
        }
        Ok(Duration::from_millis(millis))
    }

    /// All properties, sorted by key.
    pub fn properties(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }
}

/// Parse the integer millisecond literal held by property `key`.
pub fn parse_duration(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .context(InvalidDurationSnafu { key, value })
}
