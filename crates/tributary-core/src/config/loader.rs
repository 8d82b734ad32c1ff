//! Loading raw properties from YAML files and CLI overrides.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use snafu::prelude::*;

use super::{RawConfig, interpolate, is_yaml_file};
use crate::error::{ConfigError, ReadFileSnafu, YamlParseSnafu};

/// Build the raw property map.
///
/// Files are read in order and later files overwrite earlier keys; each
/// `key=value` override is applied last. Errors from every file are collected
/// before failing.
pub fn load_raw_config(paths: &[PathBuf], overrides: &[String]) -> Result<RawConfig, ConfigError> {
    let mut raw = RawConfig::new();
    let mut errors = Vec::new();

    for path in paths {
        match load_file(path) {
            Ok(properties) => raw.extend(properties),
            Err(e) => errors.push(e),
        }
    }

    for arg in overrides {
        match parse_override(arg) {
            Ok((key, value)) => {
                raw.insert(key, value);
            }
            Err(e) => errors.push(e),
        }
    }

    match errors.len() {
        0 => Ok(raw),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigError::MultipleErrors {
            errors: errors.iter().map(ToString::to_string).collect(),
        }),
    }
}

/// Split a `key=value` override. The value may itself contain `=`.
pub fn parse_override(arg: &str) -> Result<(String, String), ConfigError> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidOverride {
            arg: arg.to_string(),
        }),
    }
}

fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    let contents = interpolate(&contents)?;
    parse_properties(path, &contents)
}

fn parse_properties(path: &Path, contents: &str) -> Result<RawConfig, ConfigError> {
    let document: Option<serde_yaml::Mapping> =
        serde_yaml::from_str(contents).context(YamlParseSnafu { path })?;

    let mut raw = RawConfig::new();
    for (key, value) in document.unwrap_or_default() {
        let key = match scalar_to_string(key) {
            Some(key) => key,
            None => continue,
        };
        match value {
            Value::Null => {}
            Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => {
                return Err(ConfigError::NonScalarValue {
                    key,
                    path: path.to_path_buf(),
                });
            }
            scalar => {
                if let Some(value) = scalar_to_string(scalar) {
                    raw.insert(key, value);
                }
            }
        }
    }
    Ok(raw)
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
