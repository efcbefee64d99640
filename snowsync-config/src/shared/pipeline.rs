use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How a table is copied from the source warehouse into the destination.
///
/// The sync strategy is a closed enum selected at configuration-load time, so
/// the engine never dispatches on raw strings at runtime.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Complete replacement of the destination table via staging and atomic swap.
    Full,
    /// Merge of recently changed rows, identified by a watermark column.
    Incremental,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::Full => f.write_str("full"),
            SyncType::Incremental => f.write_str("incremental"),
        }
    }
}

/// Per-table sync configuration.
///
/// One [`TableSyncSpec`] describes how a single source table is replicated
/// into the destination. Specs are immutable for the lifetime of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSyncSpec {
    /// Name of the table in the source warehouse.
    pub source_table: String,
    /// Name of the table in the destination dataset.
    pub target_table: String,
    /// Column used to order full-sync reads and to match rows on upsert.
    pub primary_key: String,
    /// Sync strategy for this table.
    pub sync_type: SyncType,
    /// Maximum number of rows fetched from the source in one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Watermark column for incremental syncs.
    ///
    /// Required iff `sync_type` is [`SyncType::Incremental`].
    #[serde(default)]
    pub incremental_column: Option<String>,
    /// Trailing window, in days, re-scanned on each incremental run to absorb
    /// late-arriving or corrected source rows.
    ///
    /// Required iff `sync_type` is [`SyncType::Incremental`].
    #[serde(default)]
    pub lookback_days: Option<u32>,
    /// Cron expression describing when the external scheduler triggers this
    /// pipeline. Carried for operators; the engine itself does not schedule.
    #[serde(default)]
    pub schedule: Option<String>,
}

impl TableSyncSpec {
    /// Default batch size when the configuration omits one.
    pub const DEFAULT_BATCH_SIZE: usize = 5000;
}

fn default_batch_size() -> usize {
    TableSyncSpec::DEFAULT_BATCH_SIZE
}

/// A single constraint violated by a pipeline spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Name of the pipeline the violation belongs to.
    pub pipeline: String,
    /// Configuration field that violated the constraint.
    pub field: &'static str,
    /// Human-readable description of the violated constraint.
    pub constraint: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline `{}`, field `{}`: {}",
            self.pipeline, self.field, self.constraint
        )
    }
}

/// Error returned when one or more pipeline specs violate their constraints.
///
/// Validation is exhaustive rather than fail-fast: every violation across
/// every pipeline is collected so operators see all problems in one pass.
#[derive(Clone, Debug)]
pub struct ConfigValidationError {
    violations: Vec<Violation>,
}

impl ConfigValidationError {
    /// Returns all collected violations.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pipeline configuration is invalid ({} violation{}):",
            self.violations.len(),
            if self.violations.len() == 1 { "" } else { "s" }
        )?;
        for violation in &self.violations {
            writeln!(f, "  - {violation}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Mapping of pipeline name to validated [`TableSyncSpec`].
///
/// Construction goes through [`PipelineSpecs::new`], which guarantees that
/// every contained spec passed validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, TableSyncSpec>")]
pub struct PipelineSpecs {
    specs: BTreeMap<String, TableSyncSpec>,
}

impl PipelineSpecs {
    /// Validates the given specs and returns them as a [`PipelineSpecs`].
    ///
    /// Collects every violated constraint across all pipelines before
    /// returning, so a single load surfaces the complete problem list.
    pub fn new(specs: BTreeMap<String, TableSyncSpec>) -> Result<Self, ConfigValidationError> {
        let mut violations = Vec::new();

        for (name, spec) in &specs {
            validate_spec(name, spec, &mut violations);
        }

        if !violations.is_empty() {
            return Err(ConfigValidationError { violations });
        }

        Ok(Self { specs })
    }

    /// Returns the spec for the given pipeline name, if configured.
    pub fn get(&self, name: &str) -> Option<&TableSyncSpec> {
        self.specs.get(name)
    }

    /// Returns an iterator over all configured pipeline names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Returns the number of configured pipelines.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` when no pipelines are configured.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns an iterator over all configured pipelines.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableSyncSpec)> {
        self.specs.iter().map(|(name, spec)| (name.as_str(), spec))
    }
}

impl TryFrom<BTreeMap<String, TableSyncSpec>> for PipelineSpecs {
    type Error = ConfigValidationError;

    fn try_from(specs: BTreeMap<String, TableSyncSpec>) -> Result<Self, Self::Error> {
        PipelineSpecs::new(specs)
    }
}

/// Appends every constraint violated by `spec` to `violations`.
fn validate_spec(name: &str, spec: &TableSyncSpec, violations: &mut Vec<Violation>) {
    let mut violation = |field: &'static str, constraint: String| {
        violations.push(Violation {
            pipeline: name.to_string(),
            field,
            constraint,
        });
    };

    if name.trim().is_empty() {
        violation("name", "pipeline name must not be empty".to_string());
    }
    if spec.source_table.trim().is_empty() {
        violation("source_table", "must not be empty".to_string());
    }
    if spec.target_table.trim().is_empty() {
        violation("target_table", "must not be empty".to_string());
    }
    if spec.primary_key.trim().is_empty() {
        violation("primary_key", "must not be empty".to_string());
    }
    if spec.batch_size == 0 {
        violation("batch_size", "must be greater than 0".to_string());
    }

    match spec.sync_type {
        SyncType::Incremental => {
            if spec
                .incremental_column
                .as_deref()
                .is_none_or(|column| column.trim().is_empty())
            {
                violation(
                    "incremental_column",
                    "required for incremental syncs".to_string(),
                );
            }
            if spec.lookback_days.is_none() {
                violation("lookback_days", "required for incremental syncs".to_string());
            }
        }
        SyncType::Full => {
            if spec.incremental_column.is_some() {
                violation(
                    "incremental_column",
                    "must not be set on full syncs".to_string(),
                );
            }
            if spec.lookback_days.is_some() {
                violation("lookback_days", "must not be set on full syncs".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_spec() -> TableSyncSpec {
        TableSyncSpec {
            source_table: "WORK_ITEMS".to_string(),
            target_table: "work_items".to_string(),
            primary_key: "WORK_ITEM_ID".to_string(),
            sync_type: SyncType::Full,
            batch_size: 1000,
            incremental_column: None,
            lookback_days: None,
            schedule: Some("0 2 * * *".to_string()),
        }
    }

    #[test]
    fn valid_specs_pass_validation() {
        let mut specs = BTreeMap::new();
        specs.insert("work_items".to_string(), full_spec());

        let specs = PipelineSpecs::new(specs).unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs.get("work_items").is_some());
    }

    #[test]
    fn incremental_without_watermark_fields_is_rejected() {
        let mut spec = full_spec();
        spec.sync_type = SyncType::Incremental;

        let mut specs = BTreeMap::new();
        specs.insert("work_items".to_string(), spec);

        let err = PipelineSpecs::new(specs).unwrap_err();
        let fields: Vec<_> = err.violations().iter().map(|v| v.field).collect();
        assert!(fields.contains(&"incremental_column"));
        assert!(fields.contains(&"lookback_days"));
    }

    #[test]
    fn full_sync_with_incremental_fields_is_rejected() {
        let mut spec = full_spec();
        spec.incremental_column = Some("LAST_MODIFIED_TIME".to_string());
        spec.lookback_days = Some(7);

        let mut specs = BTreeMap::new();
        specs.insert("work_items".to_string(), spec);

        let err = PipelineSpecs::new(specs).unwrap_err();
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn validation_collects_violations_across_pipelines() {
        let mut broken_batch = full_spec();
        broken_batch.batch_size = 0;

        let mut broken_incremental = full_spec();
        broken_incremental.sync_type = SyncType::Incremental;
        broken_incremental.incremental_column = Some("  ".to_string());
        broken_incremental.lookback_days = Some(7);

        let mut specs = BTreeMap::new();
        specs.insert("a".to_string(), broken_batch);
        specs.insert("b".to_string(), broken_incremental);

        let err = PipelineSpecs::new(specs).unwrap_err();
        assert_eq!(err.violations().len(), 2);

        let rendered = err.to_string();
        assert!(rendered.contains("pipeline `a`"));
        assert!(rendered.contains("pipeline `b`"));
    }

    #[test]
    fn unknown_sync_type_fails_deserialization() {
        let raw = r#"{
            "items": {
                "source_table": "ITEMS",
                "target_table": "items",
                "primary_key": "ID",
                "sync_type": "snapshot"
            }
        }"#;

        assert!(serde_json::from_str::<PipelineSpecs>(raw).is_err());
    }

    #[test]
    fn batch_size_defaults_when_omitted() {
        let raw = r#"{
            "items": {
                "source_table": "ITEMS",
                "target_table": "items",
                "primary_key": "ID",
                "sync_type": "full"
            }
        }"#;

        let specs: PipelineSpecs = serde_json::from_str(raw).unwrap();
        assert_eq!(
            specs.get("items").unwrap().batch_size,
            TableSyncSpec::DEFAULT_BATCH_SIZE
        );
    }
}
