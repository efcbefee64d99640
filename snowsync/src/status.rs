//! Read-only status reporting over the run registry.

use serde::Serialize;
use snowsync_config::shared::{PipelineSpecs, SyncType};

use crate::error::{ErrorKind, SyncResult};
use crate::runner::RunRegistry;
use crate::sync_error;
use crate::types::SyncRun;

/// Point-in-time status of one configured pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub pipeline: String,
    pub sync_type: SyncType,
    pub schedule: Option<String>,
    /// The latest run, or `None` when the pipeline has never been triggered.
    pub last_run: Option<SyncRun>,
}

/// Answers status queries from the configuration and the [`RunRegistry`].
///
/// The reporter never mutates run records; it observes whatever the engines
/// last published. Cheap to clone and safe to share with request handlers.
#[derive(Clone)]
pub struct StatusReporter {
    specs: PipelineSpecs,
    registry: RunRegistry,
}

impl StatusReporter {
    pub fn new(specs: PipelineSpecs, registry: RunRegistry) -> Self {
        Self { specs, registry }
    }

    /// Returns the status of one pipeline.
    ///
    /// Unconfigured names fail with `UnknownPipeline` so callers can
    /// distinguish "never ran" from "does not exist".
    pub fn pipeline(&self, pipeline_name: &str) -> SyncResult<PipelineStatus> {
        let Some(spec) = self.specs.get(pipeline_name) else {
            return Err(sync_error!(
                ErrorKind::UnknownPipeline,
                "No such pipeline is configured",
                format!("pipeline `{pipeline_name}`")
            ));
        };

        Ok(PipelineStatus {
            pipeline: pipeline_name.to_string(),
            sync_type: spec.sync_type,
            schedule: spec.schedule.clone(),
            last_run: self.registry.latest(pipeline_name),
        })
    }

    /// Returns the status of every configured pipeline, sorted by name.
    pub fn overview(&self) -> Vec<PipelineStatus> {
        self.specs
            .iter()
            .map(|(name, spec)| PipelineStatus {
                pipeline: name.to_string(),
                sync_type: spec.sync_type,
                schedule: spec.schedule.clone(),
                last_run: self.registry.latest(name),
            })
            .collect()
    }
}
