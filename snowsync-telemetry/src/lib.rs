//! Telemetry initialization for snowsync services.

pub mod tracing;
