mod support;

use std::time::Duration;

use snowsync::concurrency::shutdown::{ShutdownRx, create_shutdown_channel};
use snowsync::destination::{Destination, MemoryDestination};
use snowsync::engine::{
    MemorySwapIntentStore, SwapIntent, SwapIntentStore, SyncSettings, TableSyncEngine,
    recover_pending_swaps,
};
use snowsync::pool::ConnectionPool;
use snowsync::source::MemorySource;
use snowsync::types::{SyncPhase, SyncStatus};
use snowsync_config::shared::TableSyncSpec;
use snowsync_telemetry::tracing::init_test_tracing;
use support::{
    FaultyDestination, SOURCE_TABLE, TARGET_TABLE, fast_settings, full_spec, incremental_spec,
    titles_by_id, work_item, work_items_schema,
};

fn pool(source: MemorySource) -> ConnectionPool<MemorySource> {
    ConnectionPool::new(
        source,
        3,
        Duration::from_secs(5),
        Duration::from_secs(300),
    )
}

fn engine<D: Destination + Send + Sync>(
    spec: TableSyncSpec,
    source: MemorySource,
    destination: D,
    settings: SyncSettings,
    shutdown_rx: ShutdownRx,
) -> TableSyncEngine<MemorySource, D, MemorySwapIntentStore> {
    TableSyncEngine::new(
        "work_items",
        spec,
        pool(source),
        destination,
        MemorySwapIntentStore::new(),
        settings,
        shutdown_rx,
    )
}

#[tokio::test]
async fn full_sync_replaces_target_and_leaves_no_staging() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![
            work_item(2, "two", 0),
            work_item(1, "one", 0),
            work_item(3, "three", 0),
        ],
    );

    let destination = MemoryDestination::new();
    destination
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(9, "stale", 30)],
        )
        .await;

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.phase, SyncPhase::Done);
    assert_eq!(run.rows_processed, 3);
    assert!(run.finished_at.is_some());

    let validation = run.validation.unwrap();
    assert_eq!(validation.source_count, 3);
    assert_eq!(validation.target_count, 3);

    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(
        titles_by_id(&rows),
        vec![
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string()),
        ]
    );

    // The staging table must be gone after promotion.
    assert_eq!(destination.table_names().await, vec![TARGET_TABLE]);
}

#[tokio::test]
async fn validation_mismatch_fails_and_preserves_previous_target() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0), work_item(2, "two", 0)],
    );

    let destination = FaultyDestination::new();
    destination
        .inner()
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(9, "previous", 30)],
        )
        .await;
    destination.swallow_rows_per_append(1);

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Failed);
    assert_eq!(run.phase, SyncPhase::Failed);
    let detail = run.error_detail.unwrap();
    assert!(detail.contains("counts disagree"), "unexpected: {detail}");

    // Previous target contents survive, staging is cleaned up.
    let rows = destination.inner().table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(9, "previous".to_string())]);
    assert_eq!(destination.inner().table_names().await, vec![TARGET_TABLE]);
}

#[tokio::test]
async fn write_failure_mid_sync_drops_staging_and_preserves_target() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![
            work_item(1, "one", 0),
            work_item(2, "two", 0),
            work_item(3, "three", 0),
            work_item(4, "four", 0),
        ],
    );

    let destination = FaultyDestination::new();
    destination
        .inner()
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(9, "previous", 30)],
        )
        .await;

    // The first batch lands in staging, the second is rejected outright.
    destination.fail_appends_after(1);

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Failed);
    assert_eq!(run.phase, SyncPhase::Failed);
    let detail = run.error_detail.unwrap();
    assert!(detail.contains("rejected the batch"), "unexpected: {detail}");

    // The half-written staging table is gone and the target is untouched.
    let rows = destination.inner().table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(9, "previous".to_string())]);
    assert_eq!(destination.inner().table_names().await, vec![TARGET_TABLE]);
}

#[tokio::test]
async fn transient_read_failures_are_retried() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0), work_item(2, "two", 0)],
    );
    source.fail_next_fetches(2);

    let destination = MemoryDestination::new();
    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.rows_processed, 2);
}

#[tokio::test]
async fn persistent_read_failures_exhaust_attempts() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0)],
    );
    source.fail_next_fetches(10);

    let destination = MemoryDestination::new();
    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Failed);
    assert!(run.error_detail.is_some());

    // The failed run's staging table must not linger.
    assert!(destination.table_names().await.is_empty());
}

#[tokio::test]
async fn incremental_sync_merges_watermark_window() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![
            work_item(1, "old unchanged", 10),
            work_item(2, "updated", 0),
            work_item(3, "brand new", 0),
        ],
    );

    let destination = MemoryDestination::new();
    destination
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(1, "old unchanged", 10), work_item(2, "original", 5)],
        )
        .await;

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(
        incremental_spec(),
        source,
        destination.clone(),
        fast_settings(),
        rx,
    )
    .run(false)
    .await;

    // Watermark is day -5, lookback 1 day: only rows at day 0 are in window.
    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.rows_processed, 2);

    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(
        titles_by_id(&rows),
        vec![
            (1, "old unchanged".to_string()),
            (2, "updated".to_string()),
            (3, "brand new".to_string()),
        ]
    );
}

#[tokio::test]
async fn incremental_sync_on_missing_target_reads_everything() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 10), work_item(2, "two", 0)],
    );

    let destination = MemoryDestination::new();
    let (_tx, rx) = create_shutdown_channel();
    let run = engine(
        incremental_spec(),
        source,
        destination.clone(),
        fast_settings(),
        rx,
    )
    .run(false)
    .await;

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.rows_processed, 2);

    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn duplicate_keys_in_window_resolve_last_write_wins() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "first", 0), work_item(1, "second", 0)],
    );

    let destination = MemoryDestination::new();
    let (_tx, rx) = create_shutdown_channel();
    let run = engine(
        incremental_spec(),
        source,
        destination.clone(),
        fast_settings(),
        rx,
    )
    .run(false)
    .await;

    assert_eq!(run.status, SyncStatus::Success);

    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(1, "second".to_string())]);
}

#[tokio::test]
async fn dry_run_reports_counts_without_writing() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0), work_item(2, "two", 0)],
    );

    let destination = MemoryDestination::new();
    destination
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(9, "existing", 30)],
        )
        .await;

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(true)
        .await;

    assert_eq!(run.status, SyncStatus::Success);
    assert!(run.dry_run);
    assert_eq!(run.rows_processed, 0);

    let validation = run.validation.unwrap();
    assert_eq!(validation.source_count, 2);
    assert_eq!(validation.target_count, 1);

    // Nothing written, nothing staged.
    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(9, "existing".to_string())]);
    assert_eq!(destination.table_names().await, vec![TARGET_TABLE]);
}

#[tokio::test]
async fn shutdown_request_cancels_between_batches() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0)],
    );

    let destination = MemoryDestination::new();
    let (tx, rx) = create_shutdown_channel();
    tx.send(true).unwrap();

    let run = engine(full_spec(), source, destination.clone(), fast_settings(), rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Failed);
    let detail = run.error_detail.unwrap();
    assert!(detail.contains("cancelled"), "unexpected: {detail}");
}

#[tokio::test]
async fn overrunning_the_deadline_fails_the_run() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![work_item(1, "one", 0), work_item(2, "two", 0)],
    );

    let destination = FaultyDestination::new();
    destination.delay_appends_ms(200);

    let settings = SyncSettings {
        run_deadline: Duration::from_millis(50),
        ..fast_settings()
    };

    let (_tx, rx) = create_shutdown_channel();
    let run = engine(full_spec(), source, destination.clone(), settings, rx)
        .run(false)
        .await;

    assert_eq!(run.status, SyncStatus::Failed);
    let detail = run.error_detail.unwrap();
    assert!(detail.contains("deadline"), "unexpected: {detail}");
}

#[tokio::test]
async fn incremental_failure_after_writes_is_partial() {
    init_test_tracing();

    let source = MemorySource::new();
    source.set_table(
        SOURCE_TABLE,
        work_items_schema(),
        vec![
            work_item(1, "one", 0),
            work_item(2, "two", 0),
            work_item(3, "three", 0),
        ],
    );

    let destination = FaultyDestination::new();
    destination.delay_upserts_ms(100);

    let (tx, rx) = create_shutdown_channel();

    // The first batch of two is merged while the delay holds the run open;
    // the cancel lands before the second loop iteration checks the signal.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });

    let run = engine(
        incremental_spec(),
        source,
        destination.clone(),
        fast_settings(),
        rx,
    )
    .run(false)
    .await;

    assert_eq!(run.status, SyncStatus::Partial);
    assert_eq!(run.rows_processed, 2);
    assert_eq!(run.phase, SyncPhase::Failed);
}

#[tokio::test]
async fn crash_recovery_completes_interrupted_swap() {
    init_test_tracing();

    let destination = MemoryDestination::new();
    destination
        .seed_table(
            "_staging_work_items_deadbeef",
            work_items_schema(),
            vec![work_item(1, "staged", 0)],
        )
        .await;
    destination
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(9, "previous", 30)],
        )
        .await;

    let intents = MemorySwapIntentStore::new();
    intents
        .record(SwapIntent::new(
            "_staging_work_items_deadbeef",
            TARGET_TABLE,
        ))
        .await
        .unwrap();

    let completed = recover_pending_swaps(&intents, &destination).await.unwrap();
    assert_eq!(completed, 1);

    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(1, "staged".to_string())]);
    assert!(intents.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn crash_recovery_discards_stale_intents() {
    init_test_tracing();

    let destination = MemoryDestination::new();
    destination
        .seed_table(
            TARGET_TABLE,
            work_items_schema(),
            vec![work_item(1, "current", 0)],
        )
        .await;

    let intents = MemorySwapIntentStore::new();
    intents
        .record(SwapIntent::new("_staging_work_items_gone", TARGET_TABLE))
        .await
        .unwrap();

    let completed = recover_pending_swaps(&intents, &destination).await.unwrap();
    assert_eq!(completed, 0);

    // Target untouched, intent cleared.
    let rows = destination.table_rows(TARGET_TABLE).await.unwrap();
    assert_eq!(titles_by_id(&rows), vec![(1, "current".to_string())]);
    assert!(intents.pending().await.unwrap().is_empty());
}
