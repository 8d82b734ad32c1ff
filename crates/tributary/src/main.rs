//! Tributary CLI: runs one checkpointed streaming job until it stops.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use tributary::{
    CliArgs, DefaultConsumerFactory, JobLifecycleController, LocalRuntime, LoggingBatchHandler,
    init_tracing, shutdown_signal,
};
use tributary_core::config::{METRICS_ADDRESS, PIPELINE_NAME, SDC_ID, load_raw_config};
use tributary_core::metrics::{DEFAULT_METRICS_ADDR, init_global};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();
    if args.config.is_empty() && args.overrides.is_empty() {
        eprintln!("Error: no config files or properties specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} file(s)", args.config.len());

    let raw = match load_raw_config(&args.config, &args.overrides) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let lookup = |key: &str| raw.get(key).map(|value| value.trim().to_string());
    let metrics_address = lookup(METRICS_ADDRESS)
        .filter(|address| !address.is_empty())
        .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
    let job_id = lookup(SDC_ID).unwrap_or_default();
    let pipeline = lookup(PIPELINE_NAME).unwrap_or_default();

    if let Err(e) = init_global(&metrics_address).await {
        eprintln!("Failed to start metrics: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = LocalRuntime::new(
        Arc::new(DefaultConsumerFactory::new(format!("tributary-{job_id}"))),
        Arc::new(LoggingBatchHandler::new(pipeline)),
    );
    let mut controller =
        JobLifecycleController::new(raw, runtime).with_shutdown_signal(shutdown_signal());

    if let Err(e) = controller.init().await {
        eprintln!("Failed to start job: {e}");
        return ExitCode::FAILURE;
    }

    let result = controller.await_termination().await;
    if let Err(e) = controller.close().await {
        error!(error = %e, "Failed to stop job");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Job failed: {e}");
            ExitCode::FAILURE
        }
    }
}
