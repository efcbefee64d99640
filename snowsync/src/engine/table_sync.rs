//! Executes one table's sync, full or incremental.

use std::time::Duration;

use chrono::Utc;
use snowsync_config::shared::{EngineConfig, SyncType, TableSyncSpec};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::destination::Destination;
use crate::engine::intent::{SwapIntent, SwapIntentStore};
use crate::engine::retry::backoff_delay;
use crate::error::{ErrorKind, SyncResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::source::{BatchRequest, RowFilter, SourceConnection, SourceConnector};
use crate::sync_error;
use crate::types::{SyncPhase, SyncRun, SyncStatus, TableRow, TableSchema, ValidationReport};

/// Runtime settings for a sync run, resolved from [`EngineConfig`].
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub validation_tolerance_percent: f64,
    pub staging_ttl: Duration,
    pub max_read_attempts: u32,
    pub retry_base_delay: Duration,
    pub run_deadline: Duration,
}

impl From<&EngineConfig> for SyncSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            validation_tolerance_percent: config.validation_tolerance_percent,
            staging_ttl: Duration::from_secs(config.staging_ttl_hours * 3600),
            max_read_attempts: config.max_read_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            run_deadline: Duration::from_secs(config.run_deadline_secs),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        (&EngineConfig::default()).into()
    }
}

/// Executes one sync run for one pipeline.
///
/// The engine owns the run's staging table exclusively and drives the
/// `Idle -> Reading -> Staging -> Validating -> Promoting -> Done` state
/// machine, with `Failed` reachable from any non-terminal phase. One engine
/// instance executes exactly one run.
pub struct TableSyncEngine<C, D, I>
where
    C: SourceConnector,
    D: Destination,
    I: SwapIntentStore,
{
    pipeline_name: String,
    spec: TableSyncSpec,
    pool: ConnectionPool<C>,
    destination: D,
    intents: I,
    settings: SyncSettings,
    shutdown_rx: ShutdownRx,
    staging_table: Option<String>,
}

impl<C, D, I> TableSyncEngine<C, D, I>
where
    C: SourceConnector,
    D: Destination + Send + Sync,
    I: SwapIntentStore,
{
    pub fn new(
        pipeline_name: impl Into<String>,
        spec: TableSyncSpec,
        pool: ConnectionPool<C>,
        destination: D,
        intents: I,
        settings: SyncSettings,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            spec,
            pool,
            destination,
            intents,
            settings,
            shutdown_rx,
            staging_table: None,
        }
    }

    /// Runs the sync to completion and returns its [`SyncRun`] record.
    ///
    /// Never panics and never returns early: every outcome, success or
    /// failure, is captured in the returned record. The run is bounded by the
    /// configured wall-clock deadline.
    pub async fn run(mut self, dry_run: bool) -> SyncRun {
        let mut run = SyncRun::started(&self.pipeline_name, dry_run);

        info!(
            pipeline = self.pipeline_name,
            sync_type = %self.spec.sync_type,
            dry_run,
            "starting sync run"
        );

        let deadline = self.settings.run_deadline;
        let result = {
            let execution = self.execute(&mut run, dry_run);
            match timeout(deadline, execution).await {
                Ok(result) => result,
                Err(_) => Err(sync_error!(
                    ErrorKind::DeadlineExceeded,
                    "Sync run exceeded its deadline",
                    format!("deadline of {deadline:?} elapsed")
                )),
            }
        };

        match result {
            Ok(validation) => {
                run.status = SyncStatus::Success;
                run.phase = SyncPhase::Done;
                run.validation = Some(validation);

                info!(
                    pipeline = self.pipeline_name,
                    rows = run.rows_processed,
                    duration_seconds = run.duration_seconds(),
                    "sync run completed"
                );
            }
            Err(err) => {
                // Incremental runs that already merged rows leave the target
                // holding a subset of the window; full syncs stay atomic.
                run.status = if !dry_run
                    && self.spec.sync_type == SyncType::Incremental
                    && run.rows_processed > 0
                {
                    SyncStatus::Partial
                } else {
                    SyncStatus::Failed
                };
                run.phase = SyncPhase::Failed;
                run.error_detail = Some(err.to_string());

                error!(
                    pipeline = self.pipeline_name,
                    error = %err,
                    "sync run failed"
                );

                self.cleanup_staging().await;
            }
        }

        run.finished_at = Some(Utc::now());
        run
    }

    async fn execute(&mut self, run: &mut SyncRun, dry_run: bool) -> SyncResult<ValidationReport> {
        if dry_run {
            return self.execute_dry_run(run).await;
        }

        match self.spec.sync_type {
            SyncType::Full => self.execute_full(run).await,
            SyncType::Incremental => self.execute_incremental(run).await,
        }
    }

    /// Full sync: stage everything, validate, atomically swap.
    async fn execute_full(&mut self, run: &mut SyncRun) -> SyncResult<ValidationReport> {
        let mut conn = self.pool.acquire().await?;

        set_phase(run, SyncPhase::Reading);
        let schema = self.fetch_schema_with_retries(&mut conn).await?;

        let staging = staging_table_name(&self.spec.target_table);
        self.destination
            .create_staging_table(&staging, &schema, self.settings.staging_ttl)
            .await?;
        self.staging_table = Some(staging.clone());

        set_phase(run, SyncPhase::Staging);
        let mut offset = 0u64;
        loop {
            self.check_cancelled()?;

            let request = BatchRequest {
                table: &self.spec.source_table,
                order_by: &self.spec.primary_key,
                offset,
                limit: self.spec.batch_size,
                filter: None,
            };
            let batch = self.fetch_batch_with_retries(&mut conn, request).await?;
            if batch.is_empty() {
                break;
            }

            let fetched = batch.len() as u64;
            self.destination.append_rows(&staging, batch).await?;

            offset += fetched;
            run.rows_processed += fetched;

            debug!(
                pipeline = self.pipeline_name,
                rows = run.rows_processed,
                "full sync progress"
            );
        }

        set_phase(run, SyncPhase::Validating);
        let source_count = self.count_with_retries(&mut conn, None).await?;
        let staged_count = self.destination.row_count(&staging).await?;
        let report = ValidationReport::new(source_count, staged_count);

        if !report.within_tolerance(self.settings.validation_tolerance_percent) {
            // The destination target is left untouched; only staging goes away.
            self.cleanup_staging().await;

            bail!(
                ErrorKind::ValidationMismatch,
                "Row counts disagree after staging",
                format!(
                    "source={source_count} staging={staged_count} difference={:.2}%",
                    report.difference_percent
                )
            );
        }

        set_phase(run, SyncPhase::Promoting);
        let intent = SwapIntent::new(&staging, &self.spec.target_table);
        let intent_id = intent.id;
        self.intents.record(intent).await?;
        self.destination
            .promote_staging(&staging, &self.spec.target_table)
            .await?;
        self.intents.clear(intent_id).await?;
        self.staging_table = None;

        Ok(report)
    }

    /// Incremental sync: merge the watermark window into the target by key.
    async fn execute_incremental(&mut self, run: &mut SyncRun) -> SyncResult<ValidationReport> {
        let incremental_column = match self.spec.incremental_column.clone() {
            Some(column) => column,
            None => bail!(
                ErrorKind::InvalidState,
                "Incremental sync without a watermark column",
                format!("pipeline `{}` passed validation without one", self.pipeline_name)
            ),
        };
        let lookback_days = self.spec.lookback_days.unwrap_or(0);

        let mut conn = self.pool.acquire().await?;

        set_phase(run, SyncPhase::Reading);
        let schema = self.fetch_schema_with_retries(&mut conn).await?;
        self.destination
            .ensure_table(&self.spec.target_table, &schema)
            .await?;

        let filter = self.watermark_filter(&incremental_column, lookback_days).await?;

        set_phase(run, SyncPhase::Staging);
        let mut offset = 0u64;
        let mut rows_read = 0u64;
        loop {
            self.check_cancelled()?;

            let request = BatchRequest {
                table: &self.spec.source_table,
                order_by: &self.spec.primary_key,
                offset,
                limit: self.spec.batch_size,
                filter: filter.as_ref(),
            };
            let batch = self.fetch_batch_with_retries(&mut conn, request).await?;
            if batch.is_empty() {
                break;
            }

            let fetched = batch.len() as u64;
            let touched = self
                .destination
                .upsert_rows(
                    &self.spec.target_table,
                    &schema,
                    &self.spec.primary_key,
                    batch,
                )
                .await?;

            offset += fetched;
            rows_read += fetched;
            run.rows_processed += touched;

            debug!(
                pipeline = self.pipeline_name,
                rows = run.rows_processed,
                "incremental sync progress"
            );
        }

        set_phase(run, SyncPhase::Validating);
        let window_count = self.count_with_retries(&mut conn, filter.as_ref()).await?;
        let report = ValidationReport::new(window_count, rows_read);

        if !report.within_tolerance(self.settings.validation_tolerance_percent) {
            bail!(
                ErrorKind::ValidationMismatch,
                "Window row counts disagree after merge",
                format!(
                    "window={window_count} read={rows_read} difference={:.2}%",
                    report.difference_percent
                )
            );
        }

        Ok(report)
    }

    /// Dry run: row counting and validation without any destination writes.
    async fn execute_dry_run(&mut self, run: &mut SyncRun) -> SyncResult<ValidationReport> {
        let mut conn = self.pool.acquire().await?;

        set_phase(run, SyncPhase::Validating);

        let filter = match (&self.spec.sync_type, self.spec.incremental_column.clone()) {
            (SyncType::Incremental, Some(column)) => {
                self.watermark_filter(&column, self.spec.lookback_days.unwrap_or(0))
                    .await?
            }
            _ => None,
        };

        let source_count = self.count_with_retries(&mut conn, filter.as_ref()).await?;
        let target_count = self.destination.row_count(&self.spec.target_table).await?;

        info!(
            pipeline = self.pipeline_name,
            source_count, target_count, "dry run counts"
        );

        Ok(ValidationReport::new(source_count, target_count))
    }

    /// Computes the incremental read filter from the target's watermark.
    ///
    /// An empty target has no watermark, so the whole source history is read.
    async fn watermark_filter(
        &self,
        incremental_column: &str,
        lookback_days: u32,
    ) -> SyncResult<Option<RowFilter>> {
        let watermark = self
            .destination
            .max_value(&self.spec.target_table, incremental_column)
            .await?;

        Ok(watermark.map(|watermark| {
            let at_least = watermark.minus_days(lookback_days);
            debug!(
                pipeline = self.pipeline_name,
                column = incremental_column,
                watermark = %at_least,
                "incremental watermark computed"
            );

            RowFilter {
                column: incremental_column.to_string(),
                at_least,
            }
        }))
    }

    async fn fetch_schema_with_retries(
        &self,
        conn: &mut PooledConnection<C>,
    ) -> SyncResult<TableSchema> {
        let mut attempt = 1;
        loop {
            match conn.fetch_schema(&self.spec.source_table).await {
                Ok(schema) => return Ok(schema),
                Err(err) => {
                    attempt = self.handle_read_error(conn, err, attempt).await?;
                }
            }
        }
    }

    async fn fetch_batch_with_retries(
        &self,
        conn: &mut PooledConnection<C>,
        request: BatchRequest<'_>,
    ) -> SyncResult<Vec<TableRow>> {
        let mut attempt = 1;
        loop {
            match conn.fetch_batch(request.clone()).await {
                Ok(rows) => return Ok(rows),
                Err(err) => {
                    attempt = self.handle_read_error(conn, err, attempt).await?;
                }
            }
        }
    }

    async fn count_with_retries(
        &self,
        conn: &mut PooledConnection<C>,
        filter: Option<&RowFilter>,
    ) -> SyncResult<u64> {
        let mut attempt = 1;
        loop {
            match conn.count_rows(&self.spec.source_table, filter).await {
                Ok(count) => return Ok(count),
                Err(err) => {
                    attempt = self.handle_read_error(conn, err, attempt).await?;
                }
            }
        }
    }

    /// Applies the retry policy to a failed source read.
    ///
    /// Transient errors back off and return the next attempt number;
    /// structural errors and exhausted attempts mark the connection broken
    /// and propagate.
    async fn handle_read_error(
        &self,
        conn: &mut PooledConnection<C>,
        err: crate::error::SyncError,
        attempt: u32,
    ) -> SyncResult<u32> {
        if err.kind().is_transient() && attempt < self.settings.max_read_attempts {
            let delay = backoff_delay(attempt, self.settings.retry_base_delay);
            warn!(
                pipeline = self.pipeline_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient source read failure, backing off"
            );
            sleep(delay).await;

            return Ok(attempt + 1);
        }

        conn.mark_broken();
        Err(err)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if is_shutdown_requested(&self.shutdown_rx) {
            bail!(
                ErrorKind::Cancelled,
                "Sync run cancelled between batches",
                format!("pipeline `{}`", self.pipeline_name)
            );
        }

        Ok(())
    }

    /// Best-effort removal of the run's staging table.
    ///
    /// Failures are logged and not retried; a truly orphaned staging table is
    /// reclaimed by its TTL.
    async fn cleanup_staging(&mut self) {
        let Some(staging) = self.staging_table.take() else {
            return;
        };

        if let Err(err) = self.destination.drop_table(&staging).await {
            warn!(
                pipeline = self.pipeline_name,
                staging,
                error = %err,
                "failed to clean up staging table, leaving it to expire"
            );
        }
    }
}

/// Sets the run's phase, logging the transition.
fn set_phase(run: &mut SyncRun, phase: SyncPhase) {
    debug!(pipeline = run.pipeline_name, ?phase, "phase transition");
    run.phase = phase;
}

/// Builds a run-unique staging table name for the given target.
///
/// The random suffix guarantees that concurrent or retried runs never collide
/// on a staging table.
fn staging_table_name(target_table: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("_staging_{}_{}", target_table, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_names_are_unique_per_run() {
        let first = staging_table_name("work_items");
        let second = staging_table_name("work_items");

        assert!(first.starts_with("_staging_work_items_"));
        assert_ne!(first, second);
    }
}
