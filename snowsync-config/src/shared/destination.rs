use serde::Deserialize;

/// BigQuery destination settings.
///
/// This intentionally does not implement `Serialize`: the service account key
/// path points at credentials and the config should never round-trip back out
/// of the process.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BigQueryDestinationConfig {
    /// GCP project holding the destination dataset.
    pub project_id: String,
    /// Dataset that target and staging tables live in.
    pub dataset_id: String,
    /// Path to the service account key file used for authentication.
    ///
    /// When unset, application-default credentials are expected to be
    /// available in the environment.
    #[serde(default)]
    pub sa_key_path: Option<String>,
}
