use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};

/// Column type buckets understood by the engine.
///
/// Source warehouse types are mapped into these buckets when the schema is
/// re-derived at the start of each run, so precision/scale variants of the
/// same base type all land in one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Numeric,
    Bool,
    Date,
    Timestamp,
    Json,
}

/// Schema of a single column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Ordered schema of a table, re-derived from the source each run.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    /// Returns the positional index of the named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Returns the names of all columns in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

/// A single typed cell value read from the source.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision numeric carried as its decimal string form.
    Numeric(String),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl CellValue {
    /// Compares two cells of the same variant.
    ///
    /// Returns `None` for mismatched variants or variants without a natural
    /// order. Used for watermark filtering on the incremental column.
    pub fn compare(&self, other: &CellValue) -> Option<Ordering> {
        match (self, other) {
            (CellValue::Integer(a), CellValue::Integer(b)) => Some(a.cmp(b)),
            (CellValue::Float(a), CellValue::Float(b)) => a.partial_cmp(b),
            (CellValue::String(a), CellValue::String(b)) => Some(a.cmp(b)),
            (CellValue::Date(a), CellValue::Date(b)) => Some(a.cmp(b)),
            (CellValue::Timestamp(a), CellValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Shifts a temporal cell back by the given number of days.
    ///
    /// Non-temporal cells are returned unchanged; the caller is expected to
    /// have validated that the incremental column is temporal if it wants the
    /// lookback window to take effect.
    pub fn minus_days(&self, days: u32) -> CellValue {
        match self {
            CellValue::Date(date) => CellValue::Date(
                date.checked_sub_days(Days::new(days as u64)).unwrap_or(*date),
            ),
            CellValue::Timestamp(ts) => CellValue::Timestamp(
                ts.checked_sub_days(Days::new(days as u64)).unwrap_or(*ts),
            ),
            other => other.clone(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::String(value) => write!(f, "{value}"),
            CellValue::Integer(value) => write!(f, "{value}"),
            CellValue::Float(value) => write!(f, "{value}"),
            CellValue::Numeric(value) => write!(f, "{value}"),
            CellValue::Bool(value) => write!(f, "{value}"),
            CellValue::Date(value) => write!(f, "{value}"),
            CellValue::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
            CellValue::Json(value) => write!(f, "{value}"),
        }
    }
}

/// One row read from the source, positionally aligned with a [`TableSchema`].
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub values: Vec<CellValue>,
}

impl TableRow {
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }

    /// Returns the cell at the given column index, if present.
    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.values.get(index)
    }
}
