use std::time::Duration;

use crate::error::SyncResult;
use crate::types::{CellValue, TableRow, TableSchema};

/// Trait for stores that can receive synced table data.
///
/// [`Destination`] implementations define how data is written to the target
/// system. The trait covers the two sync strategies: staged full replacement
/// (create staging, append, promote) and keyed upsert for incremental merges.
///
/// Implementations should be safe for concurrent use across different tables;
/// the engine guarantees that a staging table is only ever touched by the run
/// that created it, and that the target table of a pipeline is only mutated
/// by one run at a time.
pub trait Destination {
    /// Returns `true` when the table exists.
    fn table_exists(&self, table: &str) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Creates the table with the given schema if it does not already exist.
    fn ensure_table(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Creates a staging table with the given schema and expiration.
    ///
    /// The expiration is a safety net: staging tables orphaned by crashed
    /// runs are reclaimed by the store once the TTL elapses.
    fn create_staging_table(
        &self,
        table: &str,
        schema: &TableSchema,
        expires_in: Duration,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Appends a batch of rows to the given table.
    fn append_rows(
        &self,
        table: &str,
        rows: Vec<TableRow>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Upserts a batch of rows into the given table by primary key.
    ///
    /// Rows whose key already exists are overwritten, new keys are inserted.
    /// Duplicate keys within one batch resolve last-write-wins in row order.
    /// Returns the number of rows touched (inserted plus overwritten).
    fn upsert_rows(
        &self,
        table: &str,
        schema: &TableSchema,
        primary_key: &str,
        rows: Vec<TableRow>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Counts the rows currently in the given table.
    fn row_count(&self, table: &str) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Returns the maximum value of the given column, or `None` when the
    /// table is empty or missing.
    fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = SyncResult<Option<CellValue>>> + Send;

    /// Atomically replaces the target table with the staging table's contents
    /// and removes the staging table.
    ///
    /// This is the all-or-nothing promotion step of a full sync: after a
    /// successful return the target holds exactly the staged rows, and a
    /// failure must leave the previous target contents untouched.
    fn promote_staging(
        &self,
        staging: &str,
        target: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Drops the given table. Succeeds when the table does not exist.
    fn drop_table(&self, table: &str) -> impl Future<Output = SyncResult<()>> + Send;
}
