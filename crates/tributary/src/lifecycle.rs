//! Lifecycle of one checkpointed streaming job.
//!
//! [`JobLifecycleController`] moves a job through
//! `Uninitialized -> Running -> Stopped`. `init` resolves the configuration
//! and checkpoint directory, gets or creates the execution graph, wires the
//! shutdown future and starts execution. `close` and the shutdown hook both
//! funnel into a single stop: the first caller to flip the stopped flag
//! performs the graceful stop, everyone else waits for it to finish.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use snafu::prelude::*;
use tokio::sync::watch;
use tracing::{debug, error, info};

use tributary_core::config::{CHECKPOINT_ROOT, PIPELINE_NAME, SDC_ID, SOURCE_NAME, TOPIC};
use tributary_core::emit;
use tributary_core::error::{AlreadyInitializedSnafu, NoHomeDirSnafu, NotInitializedSnafu};
use tributary_core::metrics::events::{JobStarted, JobStopped};
use tributary_core::{
    CheckpointLocation, CheckpointLocator, ConfigError, JobConfiguration, JobError, RawConfig,
    RuntimeError,
};

use crate::graph::{JobSettings, build_graph};
use crate::runtime::{StreamingContext, StreamingRuntime};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Uninitialized,
    Running,
    /// Terminal.
    Stopped,
}

struct Attached {
    name: String,
    context: Arc<dyn StreamingContext>,
}

/// The job handle shared by the controller, stop handles and the shutdown
/// hook.
struct RunningJob {
    attached: OnceLock<Attached>,
    stopped: AtomicBool,
    state: watch::Sender<JobState>,
}

impl RunningJob {
    fn new() -> Self {
        Self {
            attached: OnceLock::new(),
            stopped: AtomicBool::new(false),
            state: watch::channel(JobState::Uninitialized).0,
        }
    }

    fn state(&self) -> JobState {
        *self.state.borrow()
    }

    fn context(&self) -> Option<&Arc<dyn StreamingContext>> {
        self.attached.get().map(|attached| &attached.context)
    }

    fn name(&self) -> &str {
        self.attached.get().map_or("", |attached| attached.name.as_str())
    }

    fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns true for exactly one caller.
    fn claim_stop(&self) -> bool {
        self.stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `Uninitialized -> Running`; false if a stop got there first.
    fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == JobState::Uninitialized {
                *state = JobState::Running;
                true
            } else {
                false
            }
        })
    }

    fn mark_stopped(&self, failed: bool) {
        self.state.send_replace(JobState::Stopped);
        emit!(JobStopped {
            failed,
            job: self.name().to_string(),
        });
    }

    async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == JobState::Stopped).await;
    }

    /// Gracefully stop the job. Safe to call from any task, any number of
    /// times; only the first call stops the context.
    async fn stop(&self) -> Result<(), RuntimeError> {
        let Some(context) = self.context() else {
            debug!("Job not initialized, nothing to stop");
            return Ok(());
        };

        if !self.claim_stop() {
            debug!(target = %self.name(), "Stop already requested, waiting for it");
            self.wait_stopped().await;
            return Ok(());
        }

        info!(target = %self.name(), "Gracefully stopping streaming job");
        let result = context.stop(true).await;
        let failed = result.is_err() || context.await_termination().await.is_err();
        self.mark_stopped(failed);
        info!(target = %self.name(), "Streaming job stopped");
        result
    }
}

/// Cloneable handle that stops the job from anywhere.
#[derive(Clone)]
pub struct StopHandle {
    job: Arc<RunningJob>,
}

impl StopHandle {
    /// Gracefully stop the job and wait for it. No-op before `init` and
    /// after the job stopped.
    pub async fn stop(&self) -> Result<(), JobError> {
        self.job.stop().await.map_err(Into::into)
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }
}

/// Drives one streaming job through init, execution and shutdown.
pub struct JobLifecycleController<R: StreamingRuntime> {
    raw: RawConfig,
    runtime: R,
    checkpoint_root: Option<PathBuf>,
    shutdown: Option<BoxFuture<'static, ()>>,
    location: Option<CheckpointLocation>,
    job: Arc<RunningJob>,
}

impl<R: StreamingRuntime> JobLifecycleController<R> {
    pub fn new(raw: RawConfig, runtime: R) -> Self {
        Self {
            raw,
            runtime,
            checkpoint_root: None,
            shutdown: None,
            location: None,
            job: Arc::new(RunningJob::new()),
        }
    }

    /// Gracefully stop the job when `signal` completes.
    ///
    /// The hook is registered by `init`; see [`tributary_core::shutdown_signal`]
    /// for the process signal future.
    pub fn with_shutdown_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(signal.boxed());
        self
    }

    /// Checkpoint root to use instead of `checkpoint.root` or the home
    /// directory.
    pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = Some(root.into());
        self
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            job: Arc::clone(&self.job),
        }
    }

    /// The resolved checkpoint directory, once `init` got that far.
    pub fn checkpoint_location(&self) -> Option<&CheckpointLocation> {
        self.location.as_ref()
    }

    /// Resolve configuration, get or create the job, and start it.
    ///
    /// Configuration and checkpoint failures are returned before anything
    /// starts. A second call fails with [`JobError::AlreadyInitialized`].
    pub async fn init(&mut self) -> Result<(), JobError> {
        ensure!(
            self.job.context().is_none() && self.job.state() == JobState::Uninitialized,
            AlreadyInitializedSnafu
        );

        let config = JobConfiguration::resolve(&self.raw)?;
        for (key, value) in config.properties() {
            info!(key, value, "Job property");
        }

        let batch_interval = config.batch_interval()?;
        let source_name = config.get(SOURCE_NAME)?.to_string();
        let pipeline = config.get(PIPELINE_NAME)?.to_string();
        let root = self.resolve_root(&config)?;

        let location =
            CheckpointLocator::resolve(&root, config.get(SDC_ID)?, config.get(TOPIC)?, &pipeline)
                .await?;
        info!(target = %pipeline, checkpoint = %location, "Checkpoint directory resolved");

        let settings = JobSettings {
            source_name,
            config,
            batch_interval,
        };
        let context = self
            .runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await?;
        let context: Arc<dyn StreamingContext> = Arc::new(context);
        let mode = context.start_mode();
        self.location = Some(location);

        self.job
            .attached
            .set(Attached {
                name: pipeline.clone(),
                context: Arc::clone(&context),
            })
            .map_err(|_| AlreadyInitializedSnafu.build())?;
        self.spawn_shutdown_hook();

        if self.job.stop_requested() {
            info!(target = %pipeline, "Stop requested before start, not starting");
            return Ok(());
        }

        if let Err(e) = context.start().await {
            if self.job.claim_stop() {
                self.job.mark_stopped(true);
            }
            return Err(e.into());
        }

        if self.job.mark_running() {
            emit!(JobStarted {
                mode,
                job: pipeline.clone(),
            });
            info!(target = %pipeline, mode = mode.as_str(), "Streaming job started");
        }
        Ok(())
    }

    /// Wait until the job stops by any cause.
    ///
    /// Returns the runtime's error if the job failed, and
    /// [`JobError::NotInitialized`] if `init` never attached a job.
    pub async fn await_termination(&self) -> Result<(), JobError> {
        let context = self.job.context().context(NotInitializedSnafu)?;
        let result = context.await_termination().await;

        if self.job.claim_stop() {
            if let Err(e) = &result {
                error!(target = %self.job.name(), error = %e, "Streaming job terminated with error");
            }
            self.job.mark_stopped(result.is_err());
        } else {
            self.job.wait_stopped().await;
        }

        result.map_err(Into::into)
    }

    /// Gracefully stop the job, waiting for the in-flight micro-batch to
    /// finish and checkpoint. No-op when not running.
    pub async fn close(&self) -> Result<(), JobError> {
        self.job.stop().await.map_err(Into::into)
    }

    fn resolve_root(&self, config: &JobConfiguration) -> Result<PathBuf, ConfigError> {
        if let Some(root) = &self.checkpoint_root {
            return Ok(root.clone());
        }
        if let Some(root) = config.get_optional(CHECKPOINT_ROOT) {
            return Ok(PathBuf::from(root));
        }
        dirs::home_dir().context(NoHomeDirSnafu)
    }

    fn spawn_shutdown_hook(&mut self) {
        let Some(signal) = self.shutdown.take() else {
            return;
        };

        let job = Arc::clone(&self.job);
        tokio::spawn(async move {
            tokio::select! {
                _ = signal => {
                    info!(target = %job.name(), "Shutdown signal received");
                    if let Err(e) = job.stop().await {
                        error!(target = %job.name(), error = %e, "Failed to stop streaming job");
                    }
                }
                // wait_stopped drops the non-Send watch::Ref before the select resolves.
                _ = job.wait_stopped() => {
                    debug!(target = %job.name(), "Job stopped, shutdown hook exiting");
                }
            }
        });
    }
}
