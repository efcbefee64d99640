//! The table sync engine.

pub mod intent;
pub mod retry;
pub mod table_sync;

pub use intent::{MemorySwapIntentStore, SwapIntent, SwapIntentStore, recover_pending_swaps};
pub use table_sync::{SyncSettings, TableSyncEngine};
