//! In-process streaming runtime.
//!
//! A [`LocalContext`] runs its job on one tokio task:
//! 1. Poll the consumer for up to one batch interval
//! 2. Hand the records to the [`BatchHandler`] as a [`MicroBatch`]
//! 3. Commit the new offsets to `offsets.json`
//! 4. Wait out the rest of the interval or until a stop is requested
//!
//! A stop request never interrupts steps 2 and 3, so a graceful stop always
//! leaves the last delivered batch checkpointed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tributary_core::emit;
use tributary_core::error::{AlreadyStartedSnafu, CommitSnafu, NoInputStreamSnafu};
use tributary_core::metrics::events::{BatchCompleted, BatchFailed, CheckpointCommitted, StartMode};
use tributary_core::{CheckpointLocation, JobError, RuntimeError};

use super::consumer::{BrokerConsumer, ConsumerFactory};
use super::store::{CheckpointStore, CommittedOffsets};
use super::{StreamingContext, StreamingRuntime};
use crate::batch::{BatchHandler, MicroBatch};
use crate::graph::StreamGraph;

/// Runs jobs on the current tokio runtime.
#[derive(Clone)]
pub struct LocalRuntime {
    consumers: Arc<dyn ConsumerFactory>,
    handler: Arc<dyn BatchHandler>,
}

impl LocalRuntime {
    /// Every job of this runtime reads through `consumers` and delivers its
    /// batches to `handler`.
    pub fn new(consumers: Arc<dyn ConsumerFactory>, handler: Arc<dyn BatchHandler>) -> Self {
        Self { consumers, handler }
    }
}

impl StreamingRuntime for LocalRuntime {
    type Context = LocalContext;

    async fn get_or_create<F>(
        &self,
        checkpoint: &CheckpointLocation,
        create: F,
    ) -> Result<LocalContext, JobError>
    where
        F: FnOnce() -> Result<StreamGraph, JobError> + Send,
    {
        let store = CheckpointStore::new(checkpoint.path());
        let job = checkpoint
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| checkpoint.to_string());

        let (graph, offsets, mode) = match store.load_graph().await? {
            Some(graph) => {
                let offsets = store.load_offsets().await?.unwrap_or_default();
                info!(
                    target = %job,
                    checkpoint = %checkpoint,
                    batches_completed = offsets.batches_completed(),
                    "Resuming job from checkpoint"
                );
                (graph, offsets, StartMode::Resumed)
            }
            None => {
                let graph = create()?;
                store.save_graph(&graph).await?;
                info!(target = %job, checkpoint = %checkpoint, "Created new job");
                (graph, CommittedOffsets::default(), StartMode::Created)
            }
        };

        Ok(LocalContext {
            job,
            graph,
            offsets,
            mode,
            store,
            consumers: Arc::clone(&self.consumers),
            handler: Arc::clone(&self.handler),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            task: OnceLock::new(),
            status: Arc::new(watch::channel(Status::Initialized).0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Initialized,
    Running,
    Stopped,
    Failed(String),
}

impl Status {
    fn is_terminal(&self) -> bool {
        matches!(self, Status::Stopped | Status::Failed(_))
    }
}

/// Execution handle of a job on a [`LocalRuntime`].
pub struct LocalContext {
    job: String,
    graph: StreamGraph,
    /// Offsets the job resumes from.
    offsets: CommittedOffsets,
    mode: StartMode,
    store: CheckpointStore,
    consumers: Arc<dyn ConsumerFactory>,
    handler: Arc<dyn BatchHandler>,
    started: AtomicBool,
    stop: CancellationToken,
    task: OnceLock<AbortHandle>,
    status: Arc<watch::Sender<Status>>,
}

impl LocalContext {
    pub fn graph(&self) -> &StreamGraph {
        &self.graph
    }

    /// The offsets this context started (or will start) from.
    pub fn starting_offsets(&self) -> &CommittedOffsets {
        &self.offsets
    }

    async fn open(&self) -> Result<Box<dyn BrokerConsumer>, RuntimeError> {
        let spec = self.graph.input().context(NoInputStreamSnafu)?;
        self.consumers.connect(spec, &self.offsets).await
    }
}

#[async_trait]
impl StreamingContext for LocalContext {
    fn start_mode(&self) -> StartMode {
        self.mode
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        ensure!(!self.started.swap(true, Ordering::SeqCst), AlreadyStartedSnafu);

        if self.stop.is_cancelled() {
            debug!(target = %self.job, "Stop requested before start");
            self.status.send_replace(Status::Stopped);
            return Ok(());
        }

        let consumer = match self.open().await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.status.send_replace(Status::Failed(e.to_string()));
                return Err(e);
            }
        };

        let batches = BatchLoop {
            job: self.job.clone(),
            interval: self.graph.batch_interval(),
            consumer,
            handler: Arc::clone(&self.handler),
            store: self.store.clone(),
            offsets: self.offsets.clone(),
            stop: self.stop.clone(),
        };

        self.status.send_replace(Status::Running);
        let task = tokio::spawn(batches.run());
        let _ = self.task.set(task.abort_handle());

        let status = Arc::clone(&self.status);
        let job = self.job.clone();
        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(Ok(())) => Status::Stopped,
                Ok(Err(e)) => {
                    error!(target = %job, error = %e, "Streaming job failed");
                    Status::Failed(e.to_string())
                }
                Err(e) if e.is_cancelled() => {
                    warn!(target = %job, "Streaming job aborted");
                    Status::Stopped
                }
                Err(source) => {
                    let e = RuntimeError::TaskJoin { source };
                    error!(target = %job, error = %e, "Streaming job panicked");
                    Status::Failed(e.to_string())
                }
            };
            status.send_replace(outcome);
        });

        Ok(())
    }

    async fn await_termination(&self) -> Result<(), RuntimeError> {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(Status::is_terminal).await {
            Ok(status) => status.clone(),
            // The sender lives as long as `self`.
            Err(_) => Status::Stopped,
        };

        match status {
            Status::Failed(message) => Err(RuntimeError::JobFailed { message }),
            _ => Ok(()),
        }
    }

    async fn stop(&self, graceful: bool) -> Result<(), RuntimeError> {
        self.stop.cancel();

        if !self.started.load(Ordering::SeqCst) {
            self.status.send_replace(Status::Stopped);
            return Ok(());
        }

        if !graceful {
            if let Some(task) = self.task.get() {
                task.abort();
            }
        }

        // A failure is reported through await_termination, not to the stopper.
        let _ = self.await_termination().await;
        Ok(())
    }
}

/// State owned by the execution task.
struct BatchLoop {
    job: String,
    interval: Duration,
    consumer: Box<dyn BrokerConsumer>,
    handler: Arc<dyn BatchHandler>,
    store: CheckpointStore,
    offsets: CommittedOffsets,
    stop: CancellationToken,
}

impl BatchLoop {
    async fn run(mut self) -> Result<(), RuntimeError> {
        info!(
            target = %self.job,
            interval_ms = self.interval.as_millis(),
            next_batch = self.offsets.batches_completed(),
            "Streaming job running"
        );

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let batch_start = Instant::now();
            let stop = self.stop.clone();
            // Nothing has been handed out yet, so a stop may cut the poll short.
            let records = tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!(target = %self.job, "Stop requested while polling");
                    break;
                }

                polled = self.consumer.poll(self.interval) => polled?,
            };

            let batch = MicroBatch::new(self.offsets.batches_completed(), Utc::now(), records);
            self.process(&batch).await?;

            emit!(BatchCompleted {
                records: batch.len() as u64,
                duration: batch_start.elapsed(),
                job: self.job.clone(),
            });

            let remaining = self.interval.saturating_sub(batch_start.elapsed());
            if self
                .stop
                .run_until_cancelled(tokio::time::sleep(remaining))
                .await
                .is_none()
            {
                debug!(target = %self.job, "Stop requested between batches");
                break;
            }
        }

        info!(
            target = %self.job,
            batches_completed = self.offsets.batches_completed(),
            "Streaming job stopped"
        );
        Ok(())
    }

    /// Deliver one batch and commit its offsets.
    async fn process(&mut self, batch: &MicroBatch) -> Result<(), RuntimeError> {
        if let Err(e) = self.handler.handle(batch).await {
            emit!(BatchFailed {
                job: self.job.clone(),
            });
            return Err(RuntimeError::BatchFailed {
                batch: batch.id(),
                message: e.to_string(),
            });
        }

        self.offsets.record_batch(batch);
        self.store
            .save_offsets(&self.offsets)
            .await
            .context(CommitSnafu)?;

        emit!(CheckpointCommitted {
            job: self.job.clone(),
        });
        debug!(target = %self.job, batch = batch.id(), records = batch.len(), "Committed batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tributary_core::CheckpointLocator;
    use tributary_core::config::{
        AUTO_OFFSET_RESET, MAX_WAIT_TIME, METADATA_BROKER_LIST, PIPELINE_NAME, SDC_ID, SOURCE_NAME,
        TOPIC,
    };
    use tributary_core::{JobConfiguration, RawConfig};

    use crate::batch::handler_fn;
    use crate::graph::{JobSettings, build_graph};
    use crate::runtime::MemoryBroker;
    use crate::runtime::store::OFFSETS_FILE;

    fn settings() -> JobSettings {
        let raw: RawConfig = [
            (TOPIC, "orders"),
            (MAX_WAIT_TIME, "20"),
            (METADATA_BROKER_LIST, "memory"),
            (SDC_ID, "job1"),
            (PIPELINE_NAME, "p1"),
            (SOURCE_NAME, "kafka"),
            (AUTO_OFFSET_RESET, "earliest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = JobConfiguration::resolve(&raw).unwrap();
        JobSettings {
            source_name: "kafka".to_string(),
            batch_interval: config.batch_interval().unwrap(),
            config,
        }
    }

    async fn location(root: &TempDir) -> CheckpointLocation {
        CheckpointLocator::resolve(root.path(), "job1", "orders", "p1")
            .await
            .unwrap()
    }

    fn collecting_runtime(broker: &MemoryBroker) -> (LocalRuntime, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = handler_fn(move |batch: &MicroBatch| {
            let mut sink = sink.lock().unwrap();
            for record in batch.records() {
                let payload = record.payload.as_deref().unwrap_or_default();
                sink.push(String::from_utf8_lossy(payload).into_owned());
            }
            Ok(())
        });
        (
            LocalRuntime::new(Arc::new(broker.clone()), Arc::new(handler)),
            seen,
        )
    }

    async fn wait_for(seen: &Mutex<Vec<String>>, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("records were not delivered in time");
    }

    #[tokio::test]
    async fn test_create_then_resume() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let (runtime, seen) = collecting_runtime(&broker);
        let settings = settings();
        let builds = AtomicUsize::new(0);

        let context = runtime
            .get_or_create(&location, || {
                builds.fetch_add(1, Ordering::SeqCst);
                build_graph(&settings, &location)
            })
            .await
            .unwrap();
        assert_eq!(context.start_mode(), StartMode::Created);
        assert!(location.path().join("metadata.json").is_file());

        let resumed = runtime
            .get_or_create(&location, || {
                builds.fetch_add(1, Ordering::SeqCst);
                build_graph(&settings, &location)
            })
            .await
            .unwrap();
        assert_eq!(resumed.start_mode(), StartMode::Resumed);
        assert_eq!(resumed.graph(), context.graph());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_builder_error_propagates_and_writes_nothing() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let (runtime, _) = collecting_runtime(&MemoryBroker::new());

        let result = runtime
            .get_or_create(&location, || Err(JobError::NotInitialized))
            .await;
        assert!(matches!(result, Err(JobError::NotInitialized)));
        assert!(!location.path().join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_fails_fast() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        std::fs::write(location.path().join("metadata.json"), b"garbage").unwrap();
        let (runtime, _) = collecting_runtime(&MemoryBroker::new());
        let settings = settings();

        let result = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await;
        assert!(matches!(
            result,
            Err(JobError::Storage {
                source: tributary_core::StorageError::CorruptCheckpoint { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_runs_batches_and_commits() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.produce("orders", 0, "a");
        broker.produce("orders", 0, "b");
        let (runtime, seen) = collecting_runtime(&broker);
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        context.start().await.unwrap();
        wait_for(&seen, 2).await;

        context.stop(true).await.unwrap();
        context.await_termination().await.unwrap();

        let offsets = CheckpointStore::new(location.path())
            .load_offsets()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offsets.next_offset("orders", 0), Some(2));
        assert!(location.path().join(OFFSETS_FILE).is_file());
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_resume_continues_from_committed_offsets() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.produce("orders", 0, "a");
        let settings = settings();

        let (runtime, seen) = collecting_runtime(&broker);
        let first = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        first.start().await.unwrap();
        wait_for(&seen, 1).await;
        first.stop(true).await.unwrap();

        broker.produce("orders", 0, "b");

        let (runtime, seen) = collecting_runtime(&broker);
        let second = runtime
            .get_or_create(&location, || panic!("builder must not run on resume"))
            .await
            .unwrap();
        assert_eq!(second.starting_offsets().next_offset("orders", 0), Some(1));
        second.start().await.unwrap();
        wait_for(&seen, 1).await;
        second.stop(true).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), ["b"]);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let (runtime, _) = collecting_runtime(&broker);
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        context.start().await.unwrap();
        assert!(matches!(
            context.start().await,
            Err(RuntimeError::AlreadyStarted)
        ));
        assert_eq!(broker.connections(), 1);
        context.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_terminates_job() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.produce("orders", 0, "poison");
        let handler = handler_fn(|_: &MicroBatch| Err("cannot write batch".into()));
        let runtime = LocalRuntime::new(Arc::new(broker.clone()), Arc::new(handler));
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        context.start().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), context.await_termination())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("cannot write batch"));

        // Nothing was committed for the failed batch.
        let offsets = CheckpointStore::new(location.path())
            .load_offsets()
            .await
            .unwrap();
        assert!(offsets.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_fails_start() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let (runtime, _) = collecting_runtime(&MemoryBroker::new());
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        let err = context.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Broker { .. }));
        assert!(context.await_termination().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        let (runtime, _) = collecting_runtime(&broker);
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        context.stop(true).await.unwrap();
        context.start().await.unwrap();
        context.await_termination().await.unwrap();
        assert_eq!(broker.connections(), 0);
    }

    #[tokio::test]
    async fn test_graceful_stop_finishes_in_flight_batch() {
        let root = TempDir::new().unwrap();
        let location = location(&root).await;
        let broker = MemoryBroker::new();
        broker.produce("orders", 0, "slow");

        let entered = Arc::new(tokio::sync::Notify::new());
        let handler = SlowHandler {
            entered: Arc::clone(&entered),
        };
        let runtime = LocalRuntime::new(Arc::new(broker.clone()), Arc::new(handler));
        let settings = settings();

        let context = runtime
            .get_or_create(&location, || build_graph(&settings, &location))
            .await
            .unwrap();
        let entered_batch = entered.notified();
        context.start().await.unwrap();
        entered_batch.await;

        // The handler is mid-batch; the stop has to wait for it and its commit.
        context.stop(true).await.unwrap();

        let offsets = CheckpointStore::new(location.path())
            .load_offsets()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offsets.next_offset("orders", 0), Some(1));
    }

    struct SlowHandler {
        entered: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl BatchHandler for SlowHandler {
        async fn handle(
            &self,
            batch: &MicroBatch,
        ) -> Result<(), crate::batch::BatchHandlerError> {
            if !batch.is_empty() {
                self.entered.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(())
        }
    }
}
