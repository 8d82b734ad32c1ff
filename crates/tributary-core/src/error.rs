//! Error types shared by the lifecycle controller, the checkpoint locator and
//! the streaming runtime.
//!
//! The taxonomy follows the setup/run split of a job:
//! - `ConfigError` and `StorageError` are fatal and always raised before any
//!   execution graph starts.
//! - `RuntimeError` covers failures of the streaming runtime once a graph
//!   exists (start, broker, batch handler).
//! - `JobError` is what the lifecycle surface returns.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Missing, blank, malformed or unsupported configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required key is absent.
    #[snafu(display("Property {key} cannot be null"))]
    MissingKey { key: String },

    /// A required key is present but blank after trimming.
    #[snafu(display("Property {key} cannot be empty"))]
    BlankValue { key: String },

    /// A duration value is not a non-negative integer literal.
    #[snafu(display("Invalid {key} '{value}' : {source}"))]
    InvalidDuration {
        key: String,
        value: String,
        source: std::num::ParseIntError,
    },

    /// The micro-batch interval must be positive.
    #[snafu(display("Invalid {key} '{value}' : batch interval must be greater than zero"))]
    ZeroInterval { key: String, value: String },

    /// The source technology is not one this binding supports.
    #[snafu(display("Property value {value} is invalid"))]
    UnsupportedSource { value: String },

    /// A comma-separated list contains an empty entry.
    #[snafu(display("Property {key} contains an empty entry: '{value}'"))]
    EmptyListEntry { key: String, value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML in {}: {source}", path.display()))]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Configuration values must be scalars.
    #[snafu(display("Property {key} in {} must be a scalar value", path.display()))]
    NonScalarValue { key: String, path: PathBuf },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: PathBuf },

    /// A `key=value` override could not be parsed.
    #[snafu(display("Invalid property override '{arg}': expected key=value"))]
    InvalidOverride { arg: String },

    /// Several configuration sources failed to load.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },

    /// No home directory to anchor the checkpoint root on.
    #[snafu(display("Could not determine a home directory; set checkpoint.root"))]
    NoHomeDir,
}

// ============ Storage Errors ============

/// Failures provisioning or reading checkpoint state on the shared filesystem.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Directory creation failed.
    #[snafu(display("Could not create checkpoint path {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Something other than a readable directory occupies the checkpoint path.
    #[snafu(display("Could not create checkpoint path: {}", path.display()))]
    NotADirectory { path: PathBuf },

    /// A path component would escape or collapse the checkpoint layout.
    #[snafu(display("Invalid checkpoint path segment for {name}: '{segment}'"))]
    InvalidSegment { name: String, segment: String },

    /// Reading a checkpoint file failed.
    #[snafu(display("Failed to read checkpoint file {}: {source}", path.display()))]
    ReadCheckpoint {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing a checkpoint file failed.
    #[snafu(display("Failed to write checkpoint file {}: {source}", path.display()))]
    WriteCheckpoint {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Checkpoint file exists but does not hold valid state.
    #[snafu(display("Corrupt checkpoint file {}: {source}", path.display()))]
    CorruptCheckpoint {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Checkpoint state could not be serialized.
    #[snafu(display("Failed to serialize checkpoint state: {source}"))]
    SerializeCheckpoint { source: serde_json::Error },
}

// ============ Runtime Errors ============

/// Failures of the streaming runtime while starting or executing a job.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    /// The context was already started.
    #[snafu(display("Streaming context already started"))]
    AlreadyStarted,

    /// The graph has no source attached.
    #[snafu(display("Execution graph has no input stream attached"))]
    NoInputStream,

    /// Broker client failure.
    #[snafu(display("Broker error: {message}"))]
    Broker { message: String },

    /// This build cannot talk to the requested broker technology.
    #[snafu(display("Source '{kind}' is not available in this build"))]
    SourceUnavailable { kind: String },

    /// The per-batch callback failed.
    #[snafu(display("Batch {batch} failed: {message}"))]
    BatchFailed { batch: u64, message: String },

    /// Committing checkpoint state failed.
    #[snafu(display("Checkpoint commit failed: {source}"))]
    Commit { source: StorageError },

    /// The job terminated with an error.
    #[snafu(display("Streaming job failed: {message}"))]
    JobFailed { message: String },

    /// The execution task panicked or was aborted.
    #[snafu(display("Execution task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },
}

// ============ Job Errors ============

/// Errors returned by the job lifecycle surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Runtime error.
    #[snafu(display("Runtime error: {source}"))]
    Runtime { source: RuntimeError },

    /// `init` has not been called.
    #[snafu(display("Job has not been initialized"))]
    NotInitialized,

    /// `init` was called a second time.
    #[snafu(display("Job has already been initialized"))]
    AlreadyInitialized,
}

impl JobError {
    /// True for errors raised before any execution graph was started.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, JobError::Config { .. } | JobError::Storage { .. })
    }
}

impl From<ConfigError> for JobError {
    fn from(source: ConfigError) -> Self {
        JobError::Config { source }
    }
}

impl From<StorageError> for JobError {
    fn from(source: StorageError) -> Self {
        JobError::Storage { source }
    }
}

impl From<RuntimeError> for JobError {
    fn from(source: RuntimeError) -> Self {
        JobError::Runtime { source }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse the bind address.
    #[snafu(display("Failed to parse metrics address '{address}': {source}"))]
    AddressParse {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Failed to bind the scrape listener.
    #[snafu(display("Failed to bind metrics listener on {addr}: {source}"))]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// A recorder was already installed (double init).
    #[snafu(display("Metrics recorder already installed"))]
    RecorderInstalled,
}
