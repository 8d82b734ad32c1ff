//! Checkpoint directory layout on the shared filesystem.
//!
//! Every job gets one directory:
//!
//! ```text
//! <root>/.tributary-streaming/<job id>/<url-encoded topic>/<pipeline name>/
//! ```
//!
//! The topic segment is form-urlencoded so that the commas of a multi-topic
//! specification (or any other delimiter) cannot change the shape of the
//! path. The directory is created on first resolution and never removed here;
//! its contents belong to the streaming runtime, which treats them as the
//! resume indicator.

mod encoding;

pub use encoding::{decode_topic, encode_topic};

use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use snafu::prelude::*;
use tracing::debug;

use crate::error::{CreateDirSnafu, InvalidSegmentSnafu, NotADirectorySnafu, StorageError};

/// Directory under the root that holds every job's checkpoints.
pub const CHECKPOINT_NAMESPACE: &str = ".tributary-streaming";

/// A resolved, provisioned checkpoint directory for one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointLocation {
    path: PathBuf,
    encoded_topic: String,
}

impl CheckpointLocation {
    /// The full checkpoint directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The encoded topic segment as it appears in the path.
    pub fn encoded_topic(&self) -> &str {
        &self.encoded_topic
    }

    /// The original topic specification.
    pub fn decoded_topic(&self) -> String {
        decode_topic(&self.encoded_topic)
    }
}

impl fmt::Display for CheckpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for CheckpointLocation {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Derives and provisions checkpoint directories.
pub struct CheckpointLocator;

impl CheckpointLocator {
    /// The checkpoint path for a job, without touching the filesystem.
    pub fn path_for(
        root: &Path,
        job_id: &str,
        topic: &str,
        pipeline_name: &str,
    ) -> Result<PathBuf, StorageError> {
        ensure_segment("sdc.id", job_id)?;
        ensure_segment("cluster.pipeline.name", pipeline_name)?;

        Ok(root
            .join(CHECKPOINT_NAMESPACE)
            .join(job_id)
            .join(encode_topic(topic))
            .join(pipeline_name))
    }

    /// Resolve the checkpoint directory for a job, creating it if needed.
    ///
    /// Safe to call concurrently for the same job: whichever caller loses the
    /// creation race sees the existing directory and succeeds.
    pub async fn resolve(
        root: &Path,
        job_id: &str,
        topic: &str,
        pipeline_name: &str,
    ) -> Result<CheckpointLocation, StorageError> {
        let path = Self::path_for(root, job_id, topic, pipeline_name)?;

        match tokio::fs::create_dir_all(&path).await {
            Ok(()) => {}
            // A non-directory at the path is reported by the check below.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(source) => return Err(source).context(CreateDirSnafu { path }),
        }

        ensure_readable_dir(&path).await?;
        debug!(path = %path.display(), "Checkpoint directory ready");

        Ok(CheckpointLocation {
            path,
            encoded_topic: encode_topic(topic),
        })
    }
}

fn ensure_segment(name: &str, segment: &str) -> Result<(), StorageError> {
    let mut components = Path::new(segment).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    ensure!(
        single_normal && !segment.contains(['/', '\\']),
        InvalidSegmentSnafu { name, segment }
    );
    Ok(())
}

async fn ensure_readable_dir(path: &Path) -> Result<(), StorageError> {
    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    ensure!(is_dir, NotADirectorySnafu { path });

    tokio::fs::read_dir(path)
        .await
        .map(drop)
        .map_err(|_| NotADirectorySnafu { path }.build())
}
