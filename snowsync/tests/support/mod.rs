#![allow(dead_code)]

//! Shared fixtures for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use snowsync::destination::{Destination, MemoryDestination};
use snowsync::engine::SyncSettings;
use snowsync::error::{ErrorKind, SyncResult};
use snowsync::sync_error;
use snowsync::types::{CellValue, ColumnSchema, ColumnType, TableRow, TableSchema};
use snowsync_config::shared::{SyncType, TableSyncSpec};

pub const SOURCE_TABLE: &str = "WORK_ITEMS";
pub const TARGET_TABLE: &str = "work_items";
pub const PRIMARY_KEY: &str = "WORK_ITEM_ID";
pub const WATERMARK_COLUMN: &str = "LAST_MODIFIED_TIME";

pub fn work_items_schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnSchema::new(PRIMARY_KEY, ColumnType::Integer, false),
        ColumnSchema::new("TITLE", ColumnType::String, true),
        ColumnSchema::new(WATERMARK_COLUMN, ColumnType::Timestamp, false),
    ])
}

/// Builds a work item row with its modification time `days_ago` days in the
/// past relative to a fixed reference point.
pub fn work_item(id: i64, title: &str, days_ago: i64) -> TableRow {
    let reference = Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap();
    TableRow::new(vec![
        CellValue::Integer(id),
        CellValue::String(title.to_string()),
        CellValue::Timestamp(reference - chrono::Duration::days(days_ago)),
    ])
}

pub fn full_spec() -> TableSyncSpec {
    TableSyncSpec {
        source_table: SOURCE_TABLE.to_string(),
        target_table: TARGET_TABLE.to_string(),
        primary_key: PRIMARY_KEY.to_string(),
        sync_type: SyncType::Full,
        batch_size: 2,
        incremental_column: None,
        lookback_days: None,
        schedule: None,
    }
}

pub fn incremental_spec() -> TableSyncSpec {
    TableSyncSpec {
        incremental_column: Some(WATERMARK_COLUMN.to_string()),
        lookback_days: Some(1),
        sync_type: SyncType::Incremental,
        ..full_spec()
    }
}

/// Settings tuned for fast tests: near-instant retries, generous deadline.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        validation_tolerance_percent: 0.0,
        staging_ttl: Duration::from_secs(3600),
        max_read_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
        run_deadline: Duration::from_secs(60),
    }
}

/// [`MemoryDestination`] wrapper with injectable faults.
///
/// Supports swallowing rows from appends (to force validation mismatches),
/// delaying appends (to force deadline overruns), and rejecting appends
/// outright after an accepted prefix.
#[derive(Clone, Default)]
pub struct FaultyDestination {
    inner: MemoryDestination,
    swallow_rows_per_append: Arc<AtomicU32>,
    append_delay_ms: Arc<AtomicU32>,
    upsert_delay_ms: Arc<AtomicU32>,
    fail_appends_after: Arc<std::sync::Mutex<Option<u32>>>,
    appends_seen: Arc<AtomicU32>,
}

impl FaultyDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryDestination {
        &self.inner
    }

    /// Silently drops the first `count` rows of every subsequent append.
    pub fn swallow_rows_per_append(&self, count: u32) {
        self.swallow_rows_per_append.store(count, Ordering::SeqCst);
    }

    /// Delays every subsequent append by the given number of milliseconds.
    pub fn delay_appends_ms(&self, millis: u32) {
        self.append_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Delays every subsequent upsert by the given number of milliseconds.
    pub fn delay_upserts_ms(&self, millis: u32) {
        self.upsert_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Accepts the first `count` append batches, then fails every later one.
    pub fn fail_appends_after(&self, count: u32) {
        *self
            .fail_appends_after
            .lock()
            .expect("fault flag lock poisoned") = Some(count);
    }
}

impl Destination for FaultyDestination {
    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> SyncResult<()> {
        self.inner.ensure_table(table, schema).await
    }

    async fn create_staging_table(
        &self,
        table: &str,
        schema: &TableSchema,
        expires_in: Duration,
    ) -> SyncResult<()> {
        self.inner.create_staging_table(table, schema, expires_in).await
    }

    async fn append_rows(&self, table: &str, mut rows: Vec<TableRow>) -> SyncResult<()> {
        let fail_after = *self
            .fail_appends_after
            .lock()
            .expect("fault flag lock poisoned");
        if let Some(limit) = fail_after {
            let seen = self.appends_seen.fetch_add(1, Ordering::SeqCst);
            if seen >= limit {
                return Err(sync_error!(
                    ErrorKind::DestinationWriteError,
                    "Destination rejected the batch",
                    format!("append to `{table}` failed after {limit} accepted batches")
                ));
            }
        }

        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let swallow = self.swallow_rows_per_append.load(Ordering::SeqCst) as usize;
        if swallow > 0 {
            rows.drain(..swallow.min(rows.len()));
        }

        self.inner.append_rows(table, rows).await
    }

    async fn upsert_rows(
        &self,
        table: &str,
        schema: &TableSchema,
        primary_key: &str,
        rows: Vec<TableRow>,
    ) -> SyncResult<u64> {
        let delay = self.upsert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        self.inner.upsert_rows(table, schema, primary_key, rows).await
    }

    async fn row_count(&self, table: &str) -> SyncResult<u64> {
        self.inner.row_count(table).await
    }

    async fn max_value(&self, table: &str, column: &str) -> SyncResult<Option<CellValue>> {
        self.inner.max_value(table, column).await
    }

    async fn promote_staging(&self, staging: &str, target: &str) -> SyncResult<()> {
        self.inner.promote_staging(staging, target).await
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        self.inner.drop_table(table).await
    }
}

/// Extracts the titles of the given rows, sorted by their primary key cell.
pub fn titles_by_id(rows: &[TableRow]) -> Vec<(i64, String)> {
    let mut pairs: Vec<(i64, String)> = rows
        .iter()
        .map(|row| {
            let id = match row.get(0) {
                Some(CellValue::Integer(id)) => *id,
                other => panic!("unexpected key cell {other:?}"),
            };
            let title = match row.get(1) {
                Some(CellValue::String(title)) => title.clone(),
                other => panic!("unexpected title cell {other:?}"),
            };
            (id, title)
        })
        .collect();
    pairs.sort();
    pairs
}
