//! The streaming runtime seam.
//!
//! The lifecycle controller talks to a runtime through two traits:
//! [`StreamingRuntime`] performs get-or-create keyed by a checkpoint location
//! and [`StreamingContext`] is the handle to one job's execution.
//! [`LocalRuntime`] implements both in-process on top of a
//! [`ConsumerFactory`].

mod consumer;
#[cfg(feature = "kafka")]
mod kafka;
mod local;
mod memory;
mod store;

pub use consumer::{
    BrokerConsumer, ConsumerFactory, DefaultConsumerFactory, DrainingConsumer, RecordStream,
};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConsumerFactory;
pub use local::{LocalContext, LocalRuntime};
pub use memory::MemoryBroker;
pub use store::{CheckpointStore, CommittedOffsets, METADATA_FILE, OFFSETS_FILE};

use std::future::Future;

use async_trait::async_trait;

use tributary_core::metrics::events::StartMode;
use tributary_core::{CheckpointLocation, JobError, RuntimeError};

use crate::graph::StreamGraph;

/// Handle to the execution of one job.
///
/// All methods take `&self` so the handle can be shared between the thread
/// awaiting termination and whoever requests the stop.
#[async_trait]
pub trait StreamingContext: Send + Sync {
    /// Whether the graph was built fresh or restored from a checkpoint.
    fn start_mode(&self) -> StartMode;

    /// Begin executing. Fails with [`RuntimeError::AlreadyStarted`] on a
    /// second call.
    async fn start(&self) -> Result<(), RuntimeError>;

    /// Wait until execution ends by any cause. Returns the failure if the job
    /// did not end through a stop request.
    async fn await_termination(&self) -> Result<(), RuntimeError>;

    /// Stop execution and wait for it to end.
    ///
    /// With `graceful` the in-flight micro-batch is finished and checkpointed
    /// first. Stopping a context that never started just prevents it from
    /// starting.
    async fn stop(&self, graceful: bool) -> Result<(), RuntimeError>;
}

/// A streaming runtime that can resume jobs from checkpoint state.
pub trait StreamingRuntime: Send + Sync {
    type Context: StreamingContext + 'static;

    /// Restore the job checkpointed at `checkpoint`, or build a new one with
    /// `create` when there is no checkpoint state.
    ///
    /// `create` runs at most once, and never when state exists.
    fn get_or_create<F>(
        &self,
        checkpoint: &CheckpointLocation,
        create: F,
    ) -> impl Future<Output = Result<Self::Context, JobError>> + Send
    where
        F: FnOnce() -> Result<StreamGraph, JobError> + Send;
}
