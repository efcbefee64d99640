//! Write-ahead swap intents for crash-safe staging promotion.
//!
//! Before promoting a staging table, the engine records which staging table is
//! being swapped into which target. A crash mid-swap leaves the intent behind;
//! [`recover_pending_swaps`] runs at startup and either completes the swap
//! (staging still present) or discards the intent (swap already finished, or
//! the staging table expired via its TTL and the target was never touched).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::destination::Destination;
use crate::error::SyncResult;

/// Record of an in-progress staging promotion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapIntent {
    pub id: Uuid,
    pub staging_table: String,
    pub target_table: String,
    pub recorded_at: DateTime<Utc>,
}

impl SwapIntent {
    pub fn new(staging_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            staging_table: staging_table.into(),
            target_table: target_table.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Durable store for [`SwapIntent`] records.
///
/// Production deployments back this with a table in the destination store so
/// intents survive process crashes; tests use [`MemorySwapIntentStore`].
pub trait SwapIntentStore: Send + Sync {
    /// Records an intent before the swap begins.
    fn record(&self, intent: SwapIntent) -> impl Future<Output = SyncResult<()>> + Send;

    /// Clears an intent after the swap completed.
    fn clear(&self, id: Uuid) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns all intents that were recorded but never cleared.
    fn pending(&self) -> impl Future<Output = SyncResult<Vec<SwapIntent>>> + Send;
}

/// In-memory intent store for testing and development purposes.
#[derive(Clone, Default)]
pub struct MemorySwapIntentStore {
    intents: Arc<std::sync::Mutex<HashMap<Uuid, SwapIntent>>>,
}

impl MemorySwapIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapIntentStore for MemorySwapIntentStore {
    async fn record(&self, intent: SwapIntent) -> SyncResult<()> {
        let mut intents = self.intents.lock().expect("intent lock poisoned");
        intents.insert(intent.id, intent);

        Ok(())
    }

    async fn clear(&self, id: Uuid) -> SyncResult<()> {
        let mut intents = self.intents.lock().expect("intent lock poisoned");
        intents.remove(&id);

        Ok(())
    }

    async fn pending(&self) -> SyncResult<Vec<SwapIntent>> {
        let intents = self.intents.lock().expect("intent lock poisoned");
        Ok(intents.values().cloned().collect())
    }
}

/// Completes or discards swaps interrupted by a crash.
///
/// Called once at process startup, before any new runs are accepted. Returns
/// the number of swaps that were completed.
pub async fn recover_pending_swaps<S, D>(store: &S, destination: &D) -> SyncResult<u32>
where
    S: SwapIntentStore,
    D: Destination,
{
    let pending = store.pending().await?;
    if pending.is_empty() {
        return Ok(0);
    }

    info!(count = pending.len(), "recovering pending staging swaps");

    let mut completed = 0;
    for intent in pending {
        if destination.table_exists(&intent.staging_table).await? {
            info!(
                staging = intent.staging_table,
                target = intent.target_table,
                "completing interrupted staging swap"
            );

            destination
                .promote_staging(&intent.staging_table, &intent.target_table)
                .await?;
            completed += 1;
        } else {
            // Either the swap finished before the crash, or the staging table
            // expired and the target was never touched. Both are safe to
            // forget.
            warn!(
                staging = intent.staging_table,
                target = intent.target_table,
                "discarding stale swap intent"
            );
        }

        store.clear(intent.id).await?;
    }

    Ok(completed)
}
