//! Core engine for syncing warehouse tables into an analytics store.
//!
//! The crate wires four layers together: credential fetching with a TTL cache
//! ([`credentials`]), a bounded source connection pool ([`pool`]), the table
//! sync engine itself ([`engine`]) with full and incremental strategies, and
//! the runner/status pair ([`runner`], [`status`]) that outer services build
//! their trigger and reporting surfaces on.
//!
//! Source warehouses and destination stores sit behind the
//! [`source::SourceConnector`] and [`destination::Destination`] traits;
//! in-memory implementations of both ship for testing and development.

pub mod concurrency;
pub mod credentials;
pub mod destination;
pub mod engine;
pub mod error;
pub mod macros;
pub mod pool;
pub mod runner;
pub mod source;
pub mod status;
pub mod types;
