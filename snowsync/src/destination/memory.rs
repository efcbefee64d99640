use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::destination::Destination;
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{CellValue, TableRow, TableSchema};

#[derive(Debug, Clone)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, StoredTable>,
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] stores all tables in memory with the same semantics
/// the engine relies on in production stores: staging tables carry an
/// expiration, promotion is an atomic replace, and upserts match on the
/// primary key. All data is lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table directly, bypassing the sync path.
    pub async fn seed_table(&self, name: impl Into<String>, schema: TableSchema, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            name.into(),
            StoredTable {
                schema,
                rows,
                expires_at: None,
            },
        );
    }

    /// Returns a copy of the rows currently stored for the given table.
    pub async fn table_rows(&self, name: &str) -> Option<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        inner.tables.get(name).map(|table| table.rows.clone())
    }

    /// Returns the names of all tables currently present, staging included.
    pub async fn table_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every table whose expiration has elapsed, returning how many
    /// were reclaimed. Stands in for the store-side TTL reaper.
    pub async fn reap_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.tables.len();
        inner
            .tables
            .retain(|_, table| table.expires_at.is_none_or(|deadline| deadline > Instant::now()));

        before - inner.tables.len()
    }
}

impl Destination for MemoryDestination {
    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.contains_key(table))
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(table.to_string())
            .or_insert_with(|| StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
                expires_at: None,
            });

        Ok(())
    }

    async fn create_staging_table(
        &self,
        table: &str,
        schema: &TableSchema,
        expires_in: Duration,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        info!(table, "creating staging table");

        inner.tables.insert(
            table.to_string(),
            StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
                expires_at: Some(Instant::now() + expires_in),
            },
        );

        Ok(())
    }

    async fn append_rows(&self, table: &str, rows: Vec<TableRow>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let Some(stored) = inner.tables.get_mut(table) else {
            return Err(sync_error!(
                ErrorKind::DestinationWriteError,
                "Destination table not found",
                format!("cannot append to missing table `{table}`")
            ));
        };

        debug!(table, rows = rows.len(), "appending batch");
        stored.rows.extend(rows);

        Ok(())
    }

    async fn upsert_rows(
        &self,
        table: &str,
        schema: &TableSchema,
        primary_key: &str,
        rows: Vec<TableRow>,
    ) -> SyncResult<u64> {
        let Some(key_index) = schema.column_index(primary_key) else {
            return Err(sync_error!(
                ErrorKind::DestinationWriteError,
                "Primary key column missing from schema",
                format!("column `{primary_key}` not present in table `{table}`")
            ));
        };

        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.tables.get_mut(table) else {
            return Err(sync_error!(
                ErrorKind::DestinationWriteError,
                "Destination table not found",
                format!("cannot upsert into missing table `{table}`")
            ));
        };

        let mut touched = 0u64;
        for row in rows {
            let Some(key) = row.get(key_index).cloned() else {
                return Err(sync_error!(
                    ErrorKind::DestinationWriteError,
                    "Row is missing its primary key cell",
                    format!("table `{table}`, key column `{primary_key}`")
                ));
            };

            // Last-write-wins by row order, duplicates within a batch included.
            match stored
                .rows
                .iter_mut()
                .find(|existing| existing.get(key_index) == Some(&key))
            {
                Some(existing) => *existing = row,
                None => stored.rows.push(row),
            }
            touched += 1;
        }

        debug!(table, touched, "upserted batch");

        Ok(touched)
    }

    async fn row_count(&self, table: &str) -> SyncResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table)
            .map(|stored| stored.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn max_value(&self, table: &str, column: &str) -> SyncResult<Option<CellValue>> {
        let inner = self.inner.lock().await;

        let Some(stored) = inner.tables.get(table) else {
            return Ok(None);
        };
        let Some(index) = stored.schema.column_index(column) else {
            return Ok(None);
        };

        let mut max: Option<CellValue> = None;
        for row in &stored.rows {
            let Some(cell) = row.get(index) else {
                continue;
            };
            if matches!(cell, CellValue::Null) {
                continue;
            }

            match &max {
                Some(current)
                    if cell.compare(current) != Some(std::cmp::Ordering::Greater) => {}
                _ => max = Some(cell.clone()),
            }
        }

        Ok(max)
    }

    async fn promote_staging(&self, staging: &str, target: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let Some(mut staged) = inner.tables.remove(staging) else {
            return Err(sync_error!(
                ErrorKind::DestinationWriteError,
                "Staging table not found for promotion",
                format!("staging table `{staging}` is missing")
            ));
        };

        info!(staging, target, "promoting staging table");

        // Promotion clears the staging expiration: the table is now the target.
        staged.expires_at = None;
        inner.tables.insert(target.to_string(), staged);

        Ok(())
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tables.remove(table).is_some() {
            debug!(table, "dropped table");
        }

        Ok(())
    }
}
