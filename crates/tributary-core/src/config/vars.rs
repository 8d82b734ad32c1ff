//! Environment variable interpolation for property files.
//!
//! - `$VAR` / `${VAR}`: substitute, error if unset
//! - `${VAR:-default}`: default when unset or empty
//! - `${VAR-default}`: default only when unset
//! - `$$`: literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::ConfigError;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\$\$",
        r"|\$\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<fallback>[^}]*))?\}",
        r"|\$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)",
    ))
    .expect("valid interpolation pattern")
});

/// Expand environment references in a property file.
///
/// Every unresolved reference is collected so one failed load names all of them.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();
    let text = REFERENCE.replace_all(input, |caps: &Captures| {
        substitute(caps).unwrap_or_else(|problem| {
            problems.push(problem);
            caps[0].to_string()
        })
    });

    if !problems.is_empty() {
        return Err(ConfigError::EnvInterpolation {
            message: problems.join("\n"),
        });
    }
    Ok(text.into_owned())
}

fn substitute(caps: &Captures) -> Result<String, String> {
    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return Ok("$".to_string());
    };
    let name = name.as_str();
    let fallback = caps.name("fallback").map(|m| m.as_str());
    let unset_or_empty = caps.name("op").is_some_and(|m| m.as_str() == ":-");

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            Err(format!("environment variable '{name}' contains newlines"))
        }
        Ok(value) => match fallback {
            Some(fallback) if value.is_empty() && unset_or_empty => Ok(fallback.to_string()),
            _ => Ok(value),
        },
        Err(_) => fallback
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
