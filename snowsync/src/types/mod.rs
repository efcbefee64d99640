//! Core data types shared across the sync engine.

mod row;
mod run;

pub use row::{CellValue, ColumnSchema, ColumnType, TableRow, TableSchema};
pub use run::{SyncPhase, SyncRun, SyncStatus, ValidationReport};
