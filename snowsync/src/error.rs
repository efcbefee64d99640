//! Error types and result definitions for sync operations.
//!
//! Provides a classified error system with captured callsite metadata for table
//! sync operations. [`SyncError`] carries an [`ErrorKind`] used to decide whether
//! a failure is retried internally or surfaced to the caller.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sync operations using [`SyncError`] as the error type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Specific categories of errors that can occur during sync operations.
///
/// The kind drives the propagation policy: transient kinds are retried with
/// backoff, structural kinds fail the run immediately.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The secret backend is unreachable or the secret name is unknown.
    CredentialUnavailable,
    /// All pooled connections are checked out and the bounded wait elapsed.
    PoolExhausted,
    /// Invalid configuration detected at load time or before a run.
    ConfigError,
    /// The requested pipeline name is not present in the configuration.
    UnknownPipeline,
    /// Reading the source table schema failed.
    SourceSchemaError,
    /// A source read query failed.
    SourceReadError,
    /// A destination write or table operation failed.
    DestinationWriteError,
    /// Post-sync row counts disagree beyond the configured tolerance.
    ValidationMismatch,
    /// A run for the same pipeline is already in flight.
    AlreadyRunning,
    /// The run exceeded its wall-clock deadline.
    DeadlineExceeded,
    /// The run was cancelled between batches.
    Cancelled,
    /// An operation was attempted in a state that does not allow it.
    InvalidState,
    /// Uncategorized failure.
    Unknown,
}

impl ErrorKind {
    /// Returns `true` when errors of this kind may succeed on retry.
    ///
    /// Transient errors are retried internally with exponential backoff;
    /// everything else is surfaced to the caller without automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::SourceReadError | ErrorKind::PoolExhausted)
    }
}

/// Payload stored for a [`SyncError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type for sync operations.
///
/// Carries an [`ErrorKind`] for classification, a static description, optional
/// dynamic detail, an optional source error, and the callsite location where
/// the error was created. Cloneable so results can be fanned out to multiple
/// waiters (for example during credential single-flight fetches).
#[derive(Debug, Clone)]
pub struct SyncError {
    payload: ErrorPayload,
}

impl SyncError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance. The stored source is preserved across clones and
    /// exposed via [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`SyncError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        SyncError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
            },
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}",
            self.payload.kind,
            self.payload.description,
            location.file(),
            location.line(),
        )?;

        if let Some(detail) = self.payload.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`SyncError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None)
    }
}

/// Creates a [`SyncError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_error;

    #[test]
    fn error_carries_kind_and_detail() {
        let err = sync_error!(
            ErrorKind::ValidationMismatch,
            "Row counts disagree",
            "source=10 target=9"
        );

        assert_eq!(err.kind(), ErrorKind::ValidationMismatch);
        assert_eq!(err.detail(), Some("source=10 target=9"));
        assert!(err.to_string().contains("Row counts disagree"));
    }

    #[test]
    fn transient_classification() {
        assert!(ErrorKind::SourceReadError.is_transient());
        assert!(ErrorKind::PoolExhausted.is_transient());
        assert!(!ErrorKind::ValidationMismatch.is_transient());
        assert!(!ErrorKind::DestinationWriteError.is_transient());
    }
}
