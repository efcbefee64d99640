//! Orchestrates sync runs across configured pipelines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use snowsync_config::shared::PipelineSpecs;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::Destination;
use crate::engine::{SwapIntentStore, SyncSettings, TableSyncEngine};
use crate::error::{ErrorKind, SyncResult};
use crate::pool::ConnectionPool;
use crate::source::SourceConnector;
use crate::sync_error;
use crate::types::{SyncPhase, SyncRun, SyncStatus};

/// Shared record of the latest run per pipeline.
///
/// The registry is both the status reporter's data source and the mutual
/// exclusion guard: a pipeline whose latest run is still `Running` cannot be
/// started again.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, SyncRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pipeline for a new run.
    ///
    /// Inserts a `Running` placeholder record, or fails with `AlreadyRunning`
    /// when the previous run has not finished. Check and insert happen under
    /// one lock, so two concurrent callers can never both succeed.
    fn begin(&self, pipeline_name: &str, dry_run: bool) -> SyncResult<()> {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");

        if let Some(existing) = runs.get(pipeline_name)
            && existing.status == SyncStatus::Running
        {
            bail!(
                ErrorKind::AlreadyRunning,
                "Pipeline is already running",
                format!(
                    "pipeline `{pipeline_name}` started at {}",
                    existing.started_at
                )
            );
        }

        runs.insert(
            pipeline_name.to_string(),
            SyncRun::started(pipeline_name, dry_run),
        );

        Ok(())
    }

    /// Stores the finished run, releasing the pipeline for the next trigger.
    fn record(&self, run: SyncRun) {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        runs.insert(run.pipeline_name.clone(), run);
    }

    /// Returns the latest run record for the given pipeline, if any.
    pub fn latest(&self, pipeline_name: &str) -> Option<SyncRun> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        runs.get(pipeline_name).cloned()
    }

    /// Returns the latest run record for every pipeline that has ever run.
    pub fn all(&self) -> Vec<SyncRun> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        let mut all: Vec<SyncRun> = runs.values().cloned().collect();
        all.sort_by(|a, b| a.pipeline_name.cmp(&b.pipeline_name));
        all
    }
}

struct RunnerInner<C, D, I>
where
    C: SourceConnector,
{
    specs: PipelineSpecs,
    pool: ConnectionPool<C>,
    destination: D,
    intents: I,
    settings: SyncSettings,
    shutdown_rx: ShutdownRx,
    registry: RunRegistry,
}

/// Entry point for triggering sync runs.
///
/// The runner resolves pipeline names against the configuration, enforces the
/// one-run-per-pipeline rule through its [`RunRegistry`], and hands execution
/// to a fresh [`TableSyncEngine`] per run. Cheaply cloneable; all clones share
/// the same registry and pool.
pub struct PipelineRunner<C, D, I>
where
    C: SourceConnector,
{
    inner: Arc<RunnerInner<C, D, I>>,
}

impl<C, D, I> Clone for PipelineRunner<C, D, I>
where
    C: SourceConnector,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, D, I> PipelineRunner<C, D, I>
where
    C: SourceConnector,
    D: Destination + Clone + Send + Sync + 'static,
    I: SwapIntentStore + Clone + Send + Sync + 'static,
{
    pub fn new(
        specs: PipelineSpecs,
        pool: ConnectionPool<C>,
        destination: D,
        intents: I,
        settings: SyncSettings,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                specs,
                pool,
                destination,
                intents,
                settings,
                shutdown_rx,
                registry: RunRegistry::new(),
            }),
        }
    }

    /// Returns the registry shared by all runs of this runner.
    pub fn registry(&self) -> RunRegistry {
        self.inner.registry.clone()
    }

    /// Returns the names of all configured pipelines.
    pub fn pipeline_names(&self) -> Vec<String> {
        self.inner.specs.names().map(str::to_string).collect()
    }

    /// Triggers one sync run for the named pipeline and waits for it.
    ///
    /// Fails fast with `UnknownPipeline` for unconfigured names and with
    /// `AlreadyRunning` when the pipeline's previous run is still in flight.
    /// Once a run starts its outcome is returned as `Ok`, failed runs
    /// included; run-level failures live in the [`SyncRun`] record. A started
    /// run survives the caller: if this future is dropped, the run finishes
    /// in the background and still records its outcome.
    pub async fn run(&self, pipeline_name: &str, dry_run: bool) -> SyncResult<SyncRun> {
        let Some(spec) = self.inner.specs.get(pipeline_name) else {
            return Err(sync_error!(
                ErrorKind::UnknownPipeline,
                "No such pipeline is configured",
                format!("pipeline `{pipeline_name}`")
            ));
        };
        let spec = spec.clone();

        self.inner.registry.begin(pipeline_name, dry_run)?;

        let engine = TableSyncEngine::new(
            pipeline_name,
            spec,
            self.inner.pool.clone(),
            self.inner.destination.clone(),
            self.inner.intents.clone(),
            self.inner.settings.clone(),
            self.inner.shutdown_rx.clone(),
        );

        // The run executes on a detached task: a caller that stops awaiting
        // (a disconnected HTTP client, for one) must not take the run down
        // with it, or the claim in the registry would never be released.
        let registry = self.inner.registry.clone();
        let handle = tokio::spawn(async move {
            let run = engine.run(dry_run).await;
            registry.record(run.clone());
            run
        });

        match handle.await {
            Ok(run) => Ok(run),
            Err(join_error) => {
                // The task panicked; record a failed run to free the pipeline.
                let mut run = SyncRun::started(pipeline_name, dry_run);
                run.status = SyncStatus::Failed;
                run.phase = SyncPhase::Failed;
                run.finished_at = Some(Utc::now());
                run.error_detail = Some(join_error.to_string());
                self.inner.registry.record(run);

                Err(sync_error!(
                    ErrorKind::Unknown,
                    "Sync task failed to complete",
                    format!("pipeline `{pipeline_name}`: {join_error}")
                ))
            }
        }
    }

    /// Triggers runs for several pipelines, sequentially or in parallel.
    ///
    /// Results come back in the order the names were given. Pipelines that
    /// fail to start (unknown or already running) do not prevent the others
    /// from running.
    pub async fn run_batch(
        &self,
        pipeline_names: &[String],
        parallel: bool,
        dry_run: bool,
    ) -> Vec<(String, SyncResult<SyncRun>)> {
        if !parallel {
            let mut results = Vec::with_capacity(pipeline_names.len());
            for name in pipeline_names {
                results.push((name.clone(), self.run(name, dry_run).await));
            }
            return results;
        }

        let mut tasks = JoinSet::new();
        for name in pipeline_names {
            let runner = self.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = runner.run(&name, dry_run).await;
                (name, result)
            });
        }

        let mut by_name = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    by_name.insert(name, result);
                }
                Err(err) => {
                    error!(error = %err, "sync task panicked or was cancelled");
                }
            }
        }

        info!(
            pipelines = pipeline_names.len(),
            "batch trigger completed"
        );

        pipeline_names
            .iter()
            .map(|name| {
                let result = by_name.remove(name).unwrap_or_else(|| {
                    Err(sync_error!(
                        ErrorKind::Unknown,
                        "Sync task did not report a result",
                        format!("pipeline `{name}`")
                    ))
                });
                (name.clone(), result)
            })
            .collect()
    }
}
