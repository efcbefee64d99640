use serde::Deserialize;
use snowsync_config::Config;
use snowsync_config::shared::{
    BigQueryDestinationConfig, CredentialCacheConfig, EngineConfig, PipelineSpecs, PoolConfig,
};

/// Complete configuration for the sync service.
///
/// Loaded hierarchically from `configuration/base.yaml`, the environment file,
/// and `APP_`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server settings.
    pub application: ApplicationSettings,
    /// Configured pipelines, validated at load time.
    pub pipelines: PipelineSpecs,
    /// Sync engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Source connection pool limits.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Credential cache settings.
    #[serde(default)]
    pub credentials: CredentialCacheConfig,
    /// BigQuery destination settings.
    pub destination: BigQueryDestinationConfig,
}

/// HTTP server bind settings.
#[derive(Clone, Debug, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_configuration_deserializes() {
        let raw = r#"{
            "application": { "host": "0.0.0.0", "port": 8080 },
            "pipelines": {
                "work_items": {
                    "source_table": "WORK_ITEMS",
                    "target_table": "work_items",
                    "primary_key": "WORK_ITEM_ID",
                    "sync_type": "incremental",
                    "incremental_column": "LAST_MODIFIED_TIME",
                    "lookback_days": 7,
                    "schedule": "0 2 * * *"
                }
            },
            "engine": { "validation_tolerance_percent": 0.5 },
            "pool": { "max_size": 3 },
            "destination": {
                "project_id": "analytics-prod",
                "dataset_id": "sync"
            }
        }"#;

        let config: ServiceConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.application.port, 8080);
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.engine.validation_tolerance_percent, 0.5);
        assert_eq!(config.pool.max_size, 3);
        assert!(config.destination.sa_key_path.is_none());
    }

    #[test]
    fn invalid_pipelines_fail_configuration_load() {
        let raw = r#"{
            "application": { "host": "0.0.0.0", "port": 8080 },
            "pipelines": {
                "work_items": {
                    "source_table": "WORK_ITEMS",
                    "target_table": "work_items",
                    "primary_key": "WORK_ITEM_ID",
                    "sync_type": "incremental"
                }
            },
            "destination": { "project_id": "p", "dataset_id": "d" }
        }"#;

        assert!(serde_json::from_str::<ServiceConfig>(raw).is_err());
    }
}
