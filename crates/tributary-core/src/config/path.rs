//! Command-line arguments for the host process.

use std::path::{Path, PathBuf};

use clap::Parser;

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

#[derive(Parser, Debug)]
#[command(version, about = "Run a checkpointed streaming job")]
pub struct CliArgs {
    /// Property file (YAML); may be given multiple times, later files win
    #[arg(short, long, env = "TRIBUTARY_CONFIG", value_delimiter = ',')]
    pub config: Vec<PathBuf>,

    /// Override a single property as key=value; applied after all files
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}
