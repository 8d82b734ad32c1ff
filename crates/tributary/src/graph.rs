//! The execution graph of a streaming job and the builder that creates it.
//!
//! A [`StreamGraph`] is plain data: the batch interval, the checkpoint
//! directory it was registered with, and the attached source. The runtime
//! persists it as checkpoint metadata, which is how a resumed job gets its
//! graph back without running [`build_graph`] again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tributary_core::{CheckpointLocation, JobConfiguration, JobError};

use crate::source::{StreamSourceFactory, StreamSourceSpec};

/// Execution graph of a streaming job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGraph {
    batch_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkpoint_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<StreamSourceSpec>,
}

impl StreamGraph {
    pub fn new(batch_interval: Duration) -> Self {
        Self {
            batch_interval_ms: u64::try_from(batch_interval.as_millis()).unwrap_or(u64::MAX),
            checkpoint_dir: None,
            input: None,
        }
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Register the directory the runtime checkpoints into.
    pub fn checkpoint(&mut self, dir: impl Into<PathBuf>) {
        self.checkpoint_dir = Some(dir.into());
    }

    pub fn checkpoint_dir(&self) -> Option<&Path> {
        self.checkpoint_dir.as_deref()
    }

    /// Attach a direct stream as the graph's input. Replaces any earlier one.
    pub fn attach_direct_stream(&mut self, spec: StreamSourceSpec) {
        self.input = Some(spec);
    }

    pub fn input(&self) -> Option<&StreamSourceSpec> {
        self.input.as_ref()
    }
}

/// Owned inputs to [`build_graph`].
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub source_name: String,
    pub config: JobConfiguration,
    pub batch_interval: Duration,
}

/// Build a new execution graph for a job that has no checkpoint state.
///
/// Creates the graph with the configured interval, attaches the source and
/// registers `location` as its checkpoint directory.
pub fn build_graph(
    settings: &JobSettings,
    location: &CheckpointLocation,
) -> Result<StreamGraph, JobError> {
    debug!(
        checkpoint = %location,
        source = %settings.source_name,
        "Building new execution graph"
    );

    let mut graph = StreamGraph::new(settings.batch_interval);
    StreamSourceFactory::build(&settings.source_name, &settings.config, &mut graph)?;
    graph.checkpoint(location.path());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tributary_core::config::{
        MAX_WAIT_TIME, METADATA_BROKER_LIST, PIPELINE_NAME, SDC_ID, SOURCE_NAME, TOPIC,
    };
    use tributary_core::{CheckpointLocator, ConfigError, RawConfig};

    fn settings(source_name: &str) -> JobSettings {
        let raw: RawConfig = [
            (TOPIC, "orders"),
            (MAX_WAIT_TIME, "250"),
            (METADATA_BROKER_LIST, "localhost:9092"),
            (SDC_ID, "job1"),
            (PIPELINE_NAME, "p1"),
            (SOURCE_NAME, source_name),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = JobConfiguration::resolve(&raw).unwrap();
        JobSettings {
            source_name: source_name.to_string(),
            batch_interval: config.batch_interval().unwrap(),
            config,
        }
    }

    #[tokio::test]
    async fn test_build_graph() {
        let root = TempDir::new().unwrap();
        let location = CheckpointLocator::resolve(root.path(), "job1", "orders", "p1")
            .await
            .unwrap();

        let graph = build_graph(&settings("kafka"), &location).unwrap();
        assert_eq!(graph.batch_interval(), Duration::from_millis(250));
        assert_eq!(graph.checkpoint_dir(), Some(location.path()));
        assert_eq!(graph.input().unwrap().topics(), ["orders"]);
    }

    #[tokio::test]
    async fn test_build_graph_unknown_source() {
        let root = TempDir::new().unwrap();
        let location = CheckpointLocator::resolve(root.path(), "job1", "orders", "p1")
            .await
            .unwrap();

        let err = build_graph(&settings("unknown-source"), &location).unwrap_err();
        assert!(matches!(
            err,
            JobError::Config {
                source: ConfigError::UnsupportedSource { .. }
            }
        ));
    }

    #[test]
    fn test_graph_serde() {
        let mut graph = StreamGraph::new(Duration::from_millis(1500));
        graph.checkpoint("/tmp/checkpoints/p1");

        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains("\"batch_interval_ms\":1500"));
        assert!(!json.contains("input"));

        let back: StreamGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
