use serde::{Deserialize, Serialize};

/// Runtime settings shared by every table sync run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum tolerated difference, in percent, between source and target row
    /// counts during post-sync validation. Zero means exact match required.
    #[serde(default = "default_validation_tolerance_percent")]
    pub validation_tolerance_percent: f64,
    /// Time-to-live, in hours, applied to staging tables at creation.
    ///
    /// Safety net against staging tables orphaned by crashed runs.
    #[serde(default = "default_staging_ttl_hours")]
    pub staging_ttl_hours: u64,
    /// Maximum number of attempts for a failed source read before the run fails.
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: u32,
    /// Base delay, in milliseconds, for exponential backoff between read retries.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Hard wall-clock deadline, in seconds, for a single sync run.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
}

impl EngineConfig {
    pub const DEFAULT_VALIDATION_TOLERANCE_PERCENT: f64 = 0.0;
    pub const DEFAULT_STAGING_TTL_HOURS: u64 = 6;
    pub const DEFAULT_MAX_READ_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
    pub const DEFAULT_RUN_DEADLINE_SECS: u64 = 3600;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_tolerance_percent: default_validation_tolerance_percent(),
            staging_ttl_hours: default_staging_ttl_hours(),
            max_read_attempts: default_max_read_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            run_deadline_secs: default_run_deadline_secs(),
        }
    }
}

fn default_validation_tolerance_percent() -> f64 {
    EngineConfig::DEFAULT_VALIDATION_TOLERANCE_PERCENT
}

fn default_staging_ttl_hours() -> u64 {
    EngineConfig::DEFAULT_STAGING_TTL_HOURS
}

fn default_max_read_attempts() -> u32 {
    EngineConfig::DEFAULT_MAX_READ_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    EngineConfig::DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_run_deadline_secs() -> u64 {
    EngineConfig::DEFAULT_RUN_DEADLINE_SECS
}

/// Source warehouse connection pool settings.
///
/// The pool size is the primary backpressure mechanism: it bounds how many
/// table syncs can run concurrently.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Maximum number of live connections to the source warehouse.
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    /// Maximum time, in seconds, an `acquire` waits before failing.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Connections idle longer than this, in seconds, are closed and replaced.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

impl PoolConfig {
    pub const DEFAULT_MAX_SIZE: usize = 3;
    pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_IDLE_SECS: u64 = 300;
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

fn default_pool_max_size() -> usize {
    PoolConfig::DEFAULT_MAX_SIZE
}

fn default_acquire_timeout_secs() -> u64 {
    PoolConfig::DEFAULT_ACQUIRE_TIMEOUT_SECS
}

fn default_max_idle_secs() -> u64 {
    PoolConfig::DEFAULT_MAX_IDLE_SECS
}

/// Credential cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CredentialCacheConfig {
    /// Time-to-live, in seconds, for cached secrets.
    #[serde(default = "default_credential_ttl_secs")]
    pub ttl_secs: u64,
}

impl CredentialCacheConfig {
    pub const DEFAULT_TTL_SECS: u64 = 3600;
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_credential_ttl_secs(),
        }
    }
}

fn default_credential_ttl_secs() -> u64 {
    CredentialCacheConfig::DEFAULT_TTL_SECS
}
