//! Tributary: binds a long-running pipeline to a checkpointed streaming job.
//!
//! This crate handles:
//! - Building the broker source of a new job from its properties
//! - Resuming a job from its checkpoint directory instead of rebuilding it
//! - Running micro-batches and committing their offsets
//! - Starting, awaiting and gracefully stopping the job, including on signals

pub mod batch;
pub mod graph;
pub mod lifecycle;
pub mod runtime;
pub mod source;

// Re-export commonly used items
pub use batch::{BatchHandler, LoggingBatchHandler, MicroBatch, Record, handler_fn};
pub use graph::{JobSettings, StreamGraph, build_graph};
pub use lifecycle::{JobLifecycleController, JobState, StopHandle};
pub use runtime::{
    DefaultConsumerFactory, LocalRuntime, MemoryBroker, StreamingContext, StreamingRuntime,
};
pub use source::{OffsetReset, StreamSourceFactory, StreamSourceSpec};

// Re-export from tributary-core
pub use tributary_core::{
    CheckpointLocation, CheckpointLocator, CliArgs, ConfigError, JobConfiguration, JobError,
    RawConfig, RuntimeError, SourceKind, StorageError, init_tracing, shutdown_signal,
};
