//! tributary-core: configuration, checkpoint layout and ambient plumbing for
//! checkpointed streaming jobs.
//!
//! - `config/` - property keys, validation (`JobConfiguration`) and loading
//! - `checkpoint/` - deterministic per-job checkpoint directories
//! - `error` - setup, storage and runtime error taxonomy
//! - `metrics/` - internal events and the Prometheus endpoint
//! - `signal` - process-termination signal future
//! - `tracing` - subscriber initialization

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod tracing;

pub use checkpoint::{CHECKPOINT_NAMESPACE, CheckpointLocation, CheckpointLocator};
pub use config::{CliArgs, JobConfiguration, RawConfig, SourceKind, parse_duration};
pub use error::{ConfigError, JobError, MetricsError, RuntimeError, StorageError};
pub use crate::signal::shutdown_signal;
pub use crate::tracing::init_tracing;
