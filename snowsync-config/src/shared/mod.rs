//! Shared configuration types for snowsync pipelines.

mod destination;
mod engine;
mod pipeline;

pub use destination::BigQueryDestinationConfig;
pub use engine::{CredentialCacheConfig, EngineConfig, PoolConfig};
pub use pipeline::{
    ConfigValidationError, PipelineSpecs, SyncType, TableSyncSpec, Violation,
};
