//! Environment-backed secret resolution.

use secrecy::Secret;
use snowsync::credentials::{SecretBackend, SecretValue};
use snowsync::error::{ErrorKind, SyncResult};
use snowsync::sync_error;

/// Prefix for secret environment variables.
const SECRET_ENV_PREFIX: &str = "SECRET";

/// Secret backend that resolves names from process environment variables.
///
/// A secret named `source-db-password` is read from `SECRET_SOURCE_DB_PASSWORD`.
/// Deployments inject the variables from their secret manager of choice; other
/// managers can be integrated directly by implementing [`SecretBackend`]
/// against their API instead.
#[derive(Clone, Default)]
pub struct EnvSecretBackend;

impl EnvSecretBackend {
    pub fn new() -> Self {
        Self
    }

    fn variable_name(name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();

        format!("{SECRET_ENV_PREFIX}_{normalized}")
    }
}

impl SecretBackend for EnvSecretBackend {
    async fn fetch(&self, name: &str) -> SyncResult<SecretValue> {
        let variable = Self::variable_name(name);

        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            _ => Err(sync_error!(
                ErrorKind::CredentialUnavailable,
                "Secret is not set in the environment",
                format!("expected `{variable}` for secret `{name}`")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_to_env_variables() {
        assert_eq!(
            EnvSecretBackend::variable_name("source-db-password"),
            "SECRET_SOURCE_DB_PASSWORD"
        );
        assert_eq!(
            EnvSecretBackend::variable_name("source.db.user"),
            "SECRET_SOURCE_DB_USER"
        );
    }

    #[tokio::test]
    async fn missing_variable_is_credential_unavailable() {
        let backend = EnvSecretBackend::new();
        let err = backend.fetch("definitely-not-set-anywhere").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
    }
}
