//! BigQuery destination backed by the query API.
//!
//! All mutations go through GoogleSQL statements: staging tables carry an
//! `expiration_timestamp` option so orphans are reclaimed server-side,
//! promotion is a `create or replace table ... as select`, and incremental
//! writes are `merge` statements keyed on the primary key.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use gcp_bigquery_client::{
    Client,
    client_builder::ClientBuilder,
    error::BQError,
    model::{query_request::QueryRequest, query_response::ResultSet},
};
use snowsync_config::shared::BigQueryDestinationConfig;
use tracing::{debug, info};

use crate::destination::Destination;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;
use crate::types::{CellValue, ColumnType, TableRow, TableSchema};

/// Rows per DML statement. Keeps generated SQL comfortably under BigQuery's
/// query length limit even for wide tables.
const ROWS_PER_STATEMENT: usize = 500;

fn bq_error_to_sync_error(err: BQError) -> SyncError {
    sync_error!(
        ErrorKind::DestinationWriteError,
        "BigQuery operation failed",
        source: err
    )
}

/// Destination writing to a single BigQuery dataset.
#[derive(Clone)]
pub struct BigQueryDestination {
    client: Client,
    project_id: String,
    dataset_id: String,
}

impl BigQueryDestination {
    /// Connects using a service account key file.
    pub async fn new_with_key_path(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        sa_key_path: &str,
    ) -> SyncResult<Self> {
        let client = ClientBuilder::new()
            .build_from_service_account_key_file(sa_key_path)
            .await
            .map_err(bq_error_to_sync_error)?;

        Ok(Self {
            client,
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        })
    }

    /// Connects using Application Default Credentials.
    pub async fn new_with_adc(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
    ) -> SyncResult<Self> {
        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await
            .map_err(bq_error_to_sync_error)?;

        Ok(Self {
            client,
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        })
    }

    /// Connects according to the destination configuration: key file when one
    /// is configured, Application Default Credentials otherwise.
    pub async fn from_config(config: &BigQueryDestinationConfig) -> SyncResult<Self> {
        match &config.sa_key_path {
            Some(path) => {
                Self::new_with_key_path(&config.project_id, &config.dataset_id, path).await
            }
            None => Self::new_with_adc(&config.project_id, &config.dataset_id).await,
        }
    }

    async fn query(&self, query: String) -> SyncResult<ResultSet> {
        debug!(dataset = self.dataset_id, "running bigquery statement");

        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(query))
            .await
            .map_err(bq_error_to_sync_error)?;

        Ok(ResultSet::new_from_query_response(response))
    }

    /// Returns the fully qualified, backtick-quoted table name.
    fn full_table_name(&self, table: &str) -> SyncResult<String> {
        let project = sanitize_identifier(&self.project_id, "project id")?;
        let dataset = sanitize_identifier(&self.dataset_id, "dataset id")?;
        let table = sanitize_identifier(table, "table name")?;

        Ok(format!("`{project}.{dataset}.{table}`"))
    }
}

impl Destination for BigQueryDestination {
    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let result = self
            .client
            .table()
            .get(&self.project_id, &self.dataset_id, table, None)
            .await;

        let exists =
            !matches!(result, Err(BQError::ResponseError { error }) if error.error.code == 404);

        Ok(exists)
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> SyncResult<()> {
        let full_name = self.full_table_name(table)?;
        let columns = columns_spec(schema)?;

        let query = format!("create table if not exists {full_name} {columns}");
        let _ = self.query(query).await?;

        Ok(())
    }

    async fn create_staging_table(
        &self,
        table: &str,
        schema: &TableSchema,
        expires_in: Duration,
    ) -> SyncResult<()> {
        let full_name = self.full_table_name(table)?;
        let columns = columns_spec(schema)?;
        let ttl_secs = expires_in.as_secs();

        info!(table, ttl_secs, "creating staging table in bigquery");

        let query = format!(
            "create table {full_name} {columns} options (expiration_timestamp = \
             timestamp_add(current_timestamp(), interval {ttl_secs} second))"
        );
        let _ = self.query(query).await?;

        Ok(())
    }

    async fn append_rows(&self, table: &str, rows: Vec<TableRow>) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let full_name = self.full_table_name(table)?;

        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let values = chunk
                .iter()
                .map(row_values_spec)
                .collect::<Vec<_>>()
                .join(",");

            let query = format!("insert into {full_name} values {values}");
            let _ = self.query(query).await?;
        }

        Ok(())
    }

    async fn upsert_rows(
        &self,
        table: &str,
        schema: &TableSchema,
        primary_key: &str,
        rows: Vec<TableRow>,
    ) -> SyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let full_name = self.full_table_name(table)?;
        let key = sanitize_identifier(primary_key, "primary key column")?;
        let column_names: Vec<String> = schema
            .columns
            .iter()
            .map(|column| sanitize_identifier(&column.name, "column name"))
            .collect::<SyncResult<_>>()?;

        let update_clause = column_names
            .iter()
            .filter(|name| **name != key)
            .map(|name| format!("t.`{name}` = s.`{name}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_columns = column_names
            .iter()
            .map(|name| format!("`{name}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_values = column_names
            .iter()
            .map(|name| format!("s.`{name}`"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut touched = 0u64;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let source = merge_source_spec(&column_names, chunk);

            // Source rows are deduplicated by key, keeping the last occurrence,
            // because BigQuery rejects a merge whose source matches one target
            // row twice.
            let query = format!(
                "merge {full_name} t using ( \
                 select * except (_row_number) from ( \
                 select *, row_number() over (partition by `{key}` order by _row_order desc) \
                 as _row_number from {source}) where _row_number = 1) s \
                 on t.`{key}` = s.`{key}` \
                 when matched then update set {update_clause} \
                 when not matched then insert ({insert_columns}) values ({insert_values})"
            );
            let _ = self.query(query).await?;
            touched += chunk.len() as u64;
        }

        debug!(table, touched, "merged batch into bigquery");

        Ok(touched)
    }

    async fn row_count(&self, table: &str) -> SyncResult<u64> {
        if !self.table_exists(table).await? {
            return Ok(0);
        }

        let full_name = self.full_table_name(table)?;
        let mut result = self
            .query(format!("select count(*) as row_count from {full_name}"))
            .await?;

        if !result.next_row() {
            return Ok(0);
        }

        let count = result
            .get_i64_by_name("row_count")
            .map_err(bq_error_to_sync_error)?
            .unwrap_or(0);

        Ok(count.max(0) as u64)
    }

    async fn max_value(&self, table: &str, column: &str) -> SyncResult<Option<CellValue>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let full_name = self.full_table_name(table)?;
        let column = sanitize_identifier(column, "column name")?;

        let mut result = self
            .query(format!(
                "select cast(max(`{column}`) as string) as max_value from {full_name}"
            ))
            .await?;

        if !result.next_row() {
            return Ok(None);
        }

        let raw = result
            .get_string_by_name("max_value")
            .map_err(bq_error_to_sync_error)?;

        Ok(raw.map(|text| parse_cell_text(&text)))
    }

    async fn promote_staging(&self, staging: &str, target: &str) -> SyncResult<()> {
        let staging_name = self.full_table_name(staging)?;
        let target_name = self.full_table_name(target)?;

        info!(staging, target, "promoting staging table in bigquery");

        // The replace is the atomic step; dropping staging afterwards is
        // cleanup only, its TTL covers the case where the drop is never
        // reached.
        let query = format!("create or replace table {target_name} as select * from {staging_name}");
        let _ = self.query(query).await?;

        let _ = self
            .query(format!("drop table if exists {staging_name}"))
            .await?;

        Ok(())
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        let full_name = self.full_table_name(table)?;
        let _ = self
            .query(format!("drop table if exists {full_name}"))
            .await?;

        Ok(())
    }
}

/// Sanitizes an identifier for safe backtick quoting.
///
/// Rejects empty identifiers and control characters; escapes backticks and
/// backslashes per GoogleSQL lexical rules so the quoted identifier cannot
/// break out of its delimiters.
fn sanitize_identifier(identifier: &str, context: &str) -> SyncResult<String> {
    if identifier.is_empty() {
        return Err(sync_error!(
            ErrorKind::DestinationWriteError,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        ));
    }
    if identifier.chars().any(char::is_control) {
        return Err(sync_error!(
            ErrorKind::DestinationWriteError,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        ));
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

fn bigquery_type(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::String => "string",
        ColumnType::Integer => "int64",
        ColumnType::Float => "float64",
        ColumnType::Numeric => "numeric",
        ColumnType::Bool => "bool",
        ColumnType::Date => "date",
        ColumnType::Timestamp => "timestamp",
        ColumnType::Json => "json",
    }
}

/// Builds the parenthesized column list of a CREATE TABLE statement.
fn columns_spec(schema: &TableSchema) -> SyncResult<String> {
    let columns = schema
        .columns
        .iter()
        .map(|column| {
            let name = sanitize_identifier(&column.name, "column name")?;
            let mut spec = format!("`{name}` {}", bigquery_type(column.typ));
            if !column.nullable {
                spec.push_str(" not null");
            }

            Ok(spec)
        })
        .collect::<SyncResult<Vec<_>>>()?
        .join(", ");

    Ok(format!("({columns})"))
}

/// Renders a cell as a GoogleSQL literal.
fn cell_literal(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "null".to_string(),
        CellValue::String(value) => string_literal(value),
        CellValue::Integer(value) => value.to_string(),
        CellValue::Float(value) => {
            if value.is_finite() {
                format!("{value:?}")
            } else {
                "cast('nan' as float64)".to_string()
            }
        }
        CellValue::Numeric(value) => format!("numeric {}", string_literal(value)),
        CellValue::Bool(value) => value.to_string(),
        CellValue::Date(value) => format!("date '{}'", value.format("%Y-%m-%d")),
        CellValue::Timestamp(value) => {
            format!("timestamp '{}'", value.format("%Y-%m-%d %H:%M:%S%.6f+00"))
        }
        CellValue::Json(value) => format!("json {}", string_literal(&value.to_string())),
    }
}

fn string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => escaped.push_str("\\'"),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(ch),
        }
    }
    escaped.push('\'');

    escaped
}

/// Renders one row as a parenthesized VALUES tuple.
fn row_values_spec(row: &TableRow) -> String {
    let cells = row
        .values
        .iter()
        .map(cell_literal)
        .collect::<Vec<_>>()
        .join(", ");

    format!("({cells})")
}

/// Builds the UNION ALL source relation of a MERGE statement.
///
/// Each row carries an `_row_order` ordinal so later occurrences of a
/// duplicated key win during deduplication.
fn merge_source_spec(column_names: &[String], rows: &[TableRow]) -> String {
    let selects = rows
        .iter()
        .enumerate()
        .map(|(ordinal, row)| {
            let cells = row
                .values
                .iter()
                .zip(column_names)
                .map(|(cell, name)| format!("{} as `{name}`", cell_literal(cell)))
                .collect::<Vec<_>>()
                .join(", ");

            format!("select {cells}, {ordinal} as _row_order")
        })
        .collect::<Vec<_>>()
        .join(" union all ");

    format!("({selects})")
}

/// Parses a string-cast query result back into a typed cell.
///
/// The query API returns scalar values as strings; watermark columns are
/// temporal or numeric in practice, so parsing tries those shapes first and
/// falls back to a plain string.
fn parse_cell_text(text: &str) -> CellValue {
    if let Ok(value) = text.parse::<i64>() {
        return CellValue::Integer(value);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return CellValue::Date(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return CellValue::Timestamp(ts.with_timezone(&Utc));
    }
    // String-cast timestamps come back as "2025-08-20 12:34:56.789+00".
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return CellValue::Timestamp(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return CellValue::Timestamp(naive.and_utc());
    }
    if let Ok(value) = text.parse::<f64>() {
        return CellValue::Float(value);
    }

    CellValue::String(text.to_string())
}
