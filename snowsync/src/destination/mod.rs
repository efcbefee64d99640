//! Destination store abstractions.

pub mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod memory;

pub use base::Destination;
pub use memory::MemoryDestination;
