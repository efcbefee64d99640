use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status of a sync run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
    /// Some rows were written before the run failed; the destination may hold
    /// a subset of the window (incremental syncs only, full syncs are atomic).
    Partial,
}

/// State machine phases of a table sync.
///
/// `Idle` is initial; `Done` and `Failed` are terminal. `Failed` is reachable
/// from any non-terminal phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Reading,
    Staging,
    Validating,
    Promoting,
    Done,
    Failed,
}

/// Row-count comparison produced by post-sync validation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub source_count: u64,
    pub target_count: u64,
    pub difference_percent: f64,
}

impl ValidationReport {
    /// Builds a report from the two counts, computing the difference relative
    /// to the source count. An empty source with a non-empty target counts as
    /// a full (100%) difference.
    pub fn new(source_count: u64, target_count: u64) -> Self {
        let difference = source_count.abs_diff(target_count);
        let difference_percent = if source_count > 0 {
            (difference as f64 / source_count as f64) * 100.0
        } else if target_count > 0 {
            100.0
        } else {
            0.0
        };

        Self {
            source_count,
            target_count,
            difference_percent,
        }
    }

    /// Returns `true` when the difference stays within the given tolerance.
    pub fn within_tolerance(&self, tolerance_percent: f64) -> bool {
        self.difference_percent <= tolerance_percent
    }
}

/// Record of one sync execution for a pipeline.
///
/// Created when the sync starts, mutated only by the owning engine, and
/// retained by the status reporter until superseded by the next run for the
/// same pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct SyncRun {
    pub pipeline_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_processed: u64,
    pub status: SyncStatus,
    pub phase: SyncPhase,
    pub error_detail: Option<String>,
    pub validation: Option<ValidationReport>,
    pub dry_run: bool,
}

impl SyncRun {
    /// Creates a new run in the `Running` state.
    pub fn started(pipeline_name: impl Into<String>, dry_run: bool) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            rows_processed: 0,
            status: SyncStatus::Running,
            phase: SyncPhase::Idle,
            error_detail: None,
            validation: None,
            dry_run,
        }
    }

    /// Wall-clock duration of the run, in seconds.
    ///
    /// Measured up to `finished_at`, or up to now while still running.
    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_report_difference_percent() {
        let exact = ValidationReport::new(1000, 1000);
        assert_eq!(exact.difference_percent, 0.0);
        assert!(exact.within_tolerance(0.0));

        let off_by_ten = ValidationReport::new(1000, 990);
        assert_eq!(off_by_ten.difference_percent, 1.0);
        assert!(!off_by_ten.within_tolerance(0.5));
        assert!(off_by_ten.within_tolerance(1.0));
    }

    #[test]
    fn empty_source_with_rows_in_target_is_full_difference() {
        let report = ValidationReport::new(0, 5);
        assert_eq!(report.difference_percent, 100.0);
        assert!(!report.within_tolerance(0.0));
    }
}
