//! Tracing subscriber setup shared by binaries and tests.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Default filter directive applied when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "snowsync=info,snowsync_service=info,warn";

/// Initializes the global tracing subscriber for a service binary.
///
/// The filter is read from `RUST_LOG` with a sensible default, and every
/// event is tagged with the service name as a top-level field via the target.
/// Panics if a global subscriber was already installed, since that indicates
/// a double initialization bug in the binary.
pub fn init_tracing(service_name: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_target(true)
        .init();

    tracing::info!(service = service_name, "tracing initialized");
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the subscriber,
/// and output is captured by the test harness.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}
