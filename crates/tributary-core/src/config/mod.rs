//! Job configuration: property keys, validation, and loading.
//!
//! Configuration reaches a job as a flat map of string properties. The
//! loader builds that map from YAML files and CLI overrides; the resolver
//! validates and trims it into an immutable [`JobConfiguration`].

mod loader;
mod path;
mod resolver;
mod source_kind;
mod vars;

pub use loader::{load_raw_config, parse_override};
pub use path::{CliArgs, is_yaml_file};
pub use resolver::{JobConfiguration, RawConfig, parse_duration};
pub use source_kind::SourceKind;
pub use vars::interpolate;

/// Comma-separated topic list.
pub const TOPIC: &str = "topic";
/// Micro-batch interval in milliseconds.
pub const MAX_WAIT_TIME: &str = "maxWaitTime";
/// Comma-separated broker endpoints.
pub const METADATA_BROKER_LIST: &str = "metadataBrokerList";
/// Optional offset-reset policy, forwarded verbatim to the broker client.
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
/// Job/process identity, used in the checkpoint path.
pub const SDC_ID: &str = "sdc.id";
/// Pipeline identity, the checkpoint path leaf.
pub const PIPELINE_NAME: &str = "cluster.pipeline.name";
/// Selects the source technology.
pub const SOURCE_NAME: &str = "cluster.source.name";
/// Optional checkpoint root directory (defaults to the home directory).
pub const CHECKPOINT_ROOT: &str = "checkpoint.root";
/// Optional Prometheus bind address.
pub const METRICS_ADDRESS: &str = "metrics.address";

/// Keys every job needs regardless of source technology.
pub const REQUIRED_KEYS: &[&str] = &[TOPIC, MAX_WAIT_TIME, SDC_ID, PIPELINE_NAME, SOURCE_NAME];
