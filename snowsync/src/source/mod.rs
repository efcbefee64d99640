//! Source warehouse abstractions.

pub mod base;
pub mod memory;
#[cfg(feature = "snowflake")]
pub mod snowflake;

pub use base::{BatchRequest, RowFilter, SourceConnection, SourceConnector};
pub use memory::{MemorySource, MemorySourceConnection};
#[cfg(feature = "snowflake")]
pub use snowflake::{SnowflakeConnection, SnowflakeConnector};
