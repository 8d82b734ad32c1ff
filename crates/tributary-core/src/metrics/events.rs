//! Internal events for job metrics.
//!
//! Each event struct is one measurable occurrence in a job's lifecycle and
//! records the matching Prometheus series when emitted. Every series carries
//! a `job` label (the pipeline name) so several jobs can share a scrape target.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// How a job's execution graph came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Built fresh by the create callback.
    Created,
    /// Reconstructed from checkpoint state.
    Resumed,
}

impl StartMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartMode::Created => "created",
            StartMode::Resumed => "resumed",
        }
    }
}

/// Emitted when a job starts executing.
pub struct JobStarted {
    pub mode: StartMode,
    pub job: String,
}

impl InternalEvent for JobStarted {
    fn emit(self) {
        trace!(mode = self.mode.as_str(), job = %self.job, "Job started");
        counter!("tributary_job_starts_total", "mode" => self.mode.as_str(), "job" => self.job.clone())
            .increment(1);
        gauge!("tributary_job_running", "job" => self.job).set(1.0);
    }
}

/// Emitted once a job has reached its terminal state.
pub struct JobStopped {
    pub failed: bool,
    pub job: String,
}

impl InternalEvent for JobStopped {
    fn emit(self) {
        let outcome = if self.failed { "failed" } else { "stopped" };
        trace!(outcome, job = %self.job, "Job stopped");
        counter!("tributary_job_stops_total", "outcome" => outcome, "job" => self.job.clone())
            .increment(1);
        gauge!("tributary_job_running", "job" => self.job).set(0.0);
    }
}

/// Emitted after a micro-batch was handed to the pipeline and committed.
pub struct BatchCompleted {
    pub records: u64,
    pub duration: Duration,
    pub job: String,
}

impl InternalEvent for BatchCompleted {
    fn emit(self) {
        trace!(
            records = self.records,
            duration_ms = self.duration.as_millis(),
            job = %self.job,
            "Batch completed"
        );
        counter!("tributary_batches_total", "job" => self.job.clone()).increment(1);
        counter!("tributary_records_total", "job" => self.job.clone()).increment(self.records);
        histogram!("tributary_batch_duration_seconds", "job" => self.job)
            .record(self.duration.as_secs_f64());
    }
}

/// Emitted when a micro-batch fails and takes the job down.
pub struct BatchFailed {
    pub job: String,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(job = %self.job, "Batch failed");
        counter!("tributary_batch_failures_total", "job" => self.job).increment(1);
    }
}

/// Emitted after consumption offsets are written to the checkpoint directory.
pub struct CheckpointCommitted {
    pub job: String,
}

impl InternalEvent for CheckpointCommitted {
    fn emit(self) {
        trace!(job = %self.job, "Checkpoint committed");
        counter!("tributary_checkpoints_committed_total", "job" => self.job).increment(1);
    }
}
