use crate::error::SyncResult;
use crate::types::{CellValue, TableRow, TableSchema};

/// Lower bound predicate on a single column.
///
/// Used by incremental syncs to restrict reads to rows at or past the
/// watermark (`column >= at_least`).
#[derive(Clone, Debug)]
pub struct RowFilter {
    pub column: String,
    pub at_least: CellValue,
}

/// One ordered page of a table read.
///
/// Batches are ordered by `order_by` so that offset pagination is stable
/// across fetches within a run.
#[derive(Clone, Debug)]
pub struct BatchRequest<'a> {
    pub table: &'a str,
    pub order_by: &'a str,
    pub offset: u64,
    pub limit: usize,
    pub filter: Option<&'a RowFilter>,
}

/// Factory for live connections to the source warehouse.
///
/// The connection pool uses this to lazily create connections up to its
/// maximum size.
pub trait SourceConnector: Send + Sync + 'static {
    type Connection: SourceConnection + Send + 'static;

    /// Opens a new connection to the source warehouse.
    fn connect(&self) -> impl Future<Output = SyncResult<Self::Connection>> + Send;
}

/// A live connection to the source warehouse.
///
/// Implementations execute SQL against the warehouse and return typed rows.
/// A connection that errors during use is discarded by the pool rather than
/// reused.
pub trait SourceConnection: Send {
    /// Reads the current column schema of the given table.
    ///
    /// Called at the start of every run so source-side column additions and
    /// removals are picked up without manual migrations.
    fn fetch_schema(&mut self, table: &str) -> impl Future<Output = SyncResult<TableSchema>> + Send;

    /// Reads one ordered batch of rows.
    fn fetch_batch(
        &mut self,
        request: BatchRequest<'_>,
    ) -> impl Future<Output = SyncResult<Vec<TableRow>>> + Send;

    /// Counts rows in the table, optionally restricted by a filter.
    fn count_rows(
        &mut self,
        table: &str,
        filter: Option<&RowFilter>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;
}
