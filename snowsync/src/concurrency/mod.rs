//! Concurrency primitives shared across the engine.

pub mod shutdown;
