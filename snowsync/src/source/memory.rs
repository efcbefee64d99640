use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering as AtomicOrdering};

use tracing::debug;

use crate::error::ErrorKind;
use crate::error::SyncResult;
use crate::source::base::{BatchRequest, RowFilter, SourceConnection, SourceConnector};
use crate::sync_error;
use crate::types::{TableRow, TableSchema};

#[derive(Debug, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
}

/// In-memory source warehouse for testing and development purposes.
///
/// Tables are seeded up front; reads behave like ordered `LIMIT`/`OFFSET`
/// queries against the seeded data. Transient read failures can be injected
/// to exercise the engine's retry path.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<std::sync::Mutex<Inner>>,
    connections_opened: Arc<AtomicUsize>,
    failing_fetches: Arc<AtomicU32>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds (or replaces) a table with the given schema and rows.
    pub fn set_table(&self, name: impl Into<String>, schema: TableSchema, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().expect("source lock poisoned");
        inner
            .tables
            .insert(name.into(), MemoryTable { schema, rows });
    }

    /// Appends rows to an already-seeded table.
    pub fn push_rows(&self, name: &str, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().expect("source lock poisoned");
        if let Some(table) = inner.tables.get_mut(name) {
            table.rows.extend(rows);
        }
    }

    /// Makes the next `count` batch fetches fail with a transient read error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.failing_fetches.store(count, AtomicOrdering::SeqCst);
    }

    /// Number of connections opened through this source so far.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(AtomicOrdering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_fetches
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |current| {
                (current > 0).then(|| current - 1)
            })
            .is_ok()
    }
}

impl SourceConnector for MemorySource {
    type Connection = MemorySourceConnection;

    async fn connect(&self) -> SyncResult<Self::Connection> {
        self.connections_opened.fetch_add(1, AtomicOrdering::SeqCst);

        Ok(MemorySourceConnection {
            source: self.clone(),
        })
    }
}

/// A connection handed out by [`MemorySource`].
pub struct MemorySourceConnection {
    source: MemorySource,
}

impl MemorySourceConnection {
    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&MemoryTable) -> T,
    ) -> SyncResult<T> {
        let inner = self.source.inner.lock().expect("source lock poisoned");
        match inner.tables.get(table) {
            Some(memory_table) => Ok(f(memory_table)),
            None => Err(sync_error!(
                ErrorKind::SourceSchemaError,
                "Source table not found",
                format!("table `{table}` does not exist in the source")
            )),
        }
    }
}

/// Returns `true` when the row passes the filter.
fn row_matches(row: &TableRow, schema: &TableSchema, filter: &RowFilter) -> bool {
    let Some(index) = schema.column_index(&filter.column) else {
        return false;
    };
    let Some(cell) = row.get(index) else {
        return false;
    };

    matches!(
        cell.compare(&filter.at_least),
        Some(Ordering::Greater | Ordering::Equal)
    )
}

impl SourceConnection for MemorySourceConnection {
    async fn fetch_schema(&mut self, table: &str) -> SyncResult<TableSchema> {
        self.with_table(table, |memory_table| memory_table.schema.clone())
    }

    async fn fetch_batch(&mut self, request: BatchRequest<'_>) -> SyncResult<Vec<TableRow>> {
        if self.source.take_injected_failure() {
            return Err(sync_error!(
                ErrorKind::SourceReadError,
                "Injected transient read failure"
            ));
        }

        self.with_table(request.table, |memory_table| {
            let mut rows: Vec<TableRow> = memory_table
                .rows
                .iter()
                .filter(|row| {
                    request
                        .filter
                        .is_none_or(|filter| row_matches(row, &memory_table.schema, filter))
                })
                .cloned()
                .collect();

            if let Some(order_index) = memory_table.schema.column_index(request.order_by) {
                rows.sort_by(|a, b| {
                    match (a.get(order_index), b.get(order_index)) {
                        (Some(left), Some(right)) => {
                            left.compare(right).unwrap_or(Ordering::Equal)
                        }
                        _ => Ordering::Equal,
                    }
                });
            }

            let batch: Vec<TableRow> = rows
                .into_iter()
                .skip(request.offset as usize)
                .take(request.limit)
                .collect();

            debug!(
                table = request.table,
                offset = request.offset,
                rows = batch.len(),
                "fetched batch from memory source"
            );

            batch
        })
    }

    async fn count_rows(&mut self, table: &str, filter: Option<&RowFilter>) -> SyncResult<u64> {
        self.with_table(table, |memory_table| {
            memory_table
                .rows
                .iter()
                .filter(|row| {
                    filter.is_none_or(|filter| row_matches(row, &memory_table.schema, filter))
                })
                .count() as u64
        })
    }
}
