use std::time::Duration;

use secrecy::ExposeSecret;
use snowsync::credentials::{
    CredentialStore, MemorySecretBackend, SourceCredentialNames, SourceCredentials,
};
use snowsync::error::ErrorKind;
use snowsync_telemetry::tracing::init_test_tracing;

#[tokio::test]
async fn cache_hit_performs_no_backend_call() {
    init_test_tracing();

    let backend = MemorySecretBackend::new();
    backend.insert("source-db-password", "hunter2");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));

    let first = store.get("source-db-password").await.unwrap();
    assert_eq!(first.expose_secret(), "hunter2");

    let second = store.get("source-db-password").await.unwrap();
    assert_eq!(second.expose_secret(), "hunter2");

    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn expired_entry_is_refetched() {
    init_test_tracing();

    let backend = MemorySecretBackend::new();
    backend.insert("source-db-password", "hunter2");

    let store = CredentialStore::new(backend.clone(), Duration::from_millis(20));

    store.get("source-db-password").await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    store.get("source-db-password").await.unwrap();

    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    init_test_tracing();

    let backend =
        MemorySecretBackend::new().with_fetch_delay(Duration::from_millis(50));
    backend.insert("source-db-password", "hunter2");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));

    let (a, b, c) = tokio::join!(
        store.get("source-db-password"),
        store.get("source-db-password"),
        store.get("source-db-password"),
    );

    assert_eq!(a.unwrap().expose_secret(), "hunter2");
    assert_eq!(b.unwrap().expose_secret(), "hunter2");
    assert_eq!(c.unwrap().expose_secret(), "hunter2");

    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn failed_fetch_is_not_cached() {
    init_test_tracing();

    let backend = MemorySecretBackend::new();
    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));

    let err = store.get("source-db-password").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);

    // The backend recovers; the next call must go through, not replay the
    // cached failure.
    backend.insert("source-db-password", "hunter2");
    let value = store.get("source-db-password").await.unwrap();
    assert_eq!(value.expose_secret(), "hunter2");

    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    init_test_tracing();

    let backend = MemorySecretBackend::new();
    backend.insert("source-db-password", "old");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));
    store.get("source-db-password").await.unwrap();

    backend.insert("source-db-password", "rotated");
    store.invalidate("source-db-password");

    let value = store.get("source-db-password").await.unwrap();
    assert_eq!(value.expose_secret(), "rotated");
    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn cancelled_fetch_does_not_wedge_the_store() {
    init_test_tracing();

    let backend =
        MemorySecretBackend::new().with_fetch_delay(Duration::from_millis(100));
    backend.insert("source-db-password", "hunter2");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));

    let fetcher = {
        let store = store.clone();
        tokio::spawn(async move { store.get("source-db-password").await })
    };

    // Abort mid-fetch, leaving the in-flight slot behind if nothing cleans it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    fetcher.abort();
    let _ = fetcher.await;

    let value = store.get("source-db-password").await.unwrap();
    assert_eq!(value.expose_secret(), "hunter2");
}

#[tokio::test]
async fn waiter_takes_over_when_the_fetcher_is_cancelled() {
    init_test_tracing();

    let backend =
        MemorySecretBackend::new().with_fetch_delay(Duration::from_millis(100));
    backend.insert("source-db-password", "hunter2");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));

    let fetcher = {
        let store = store.clone();
        tokio::spawn(async move { store.get("source-db-password").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // This caller joins the in-flight fetch as a waiter.
    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.get("source-db-password").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    fetcher.abort();
    let _ = fetcher.await;

    // The waiter claims the fetch for itself instead of failing.
    let value = waiter.await.unwrap().unwrap();
    assert_eq!(value.expose_secret(), "hunter2");
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn source_credentials_resolve_the_full_parameter_set() {
    init_test_tracing();

    let backend = MemorySecretBackend::new();
    backend.insert("source-db-user", "svc_sync");
    backend.insert("source-db-password", "hunter2");
    backend.insert("source-db-account", "org-account");
    backend.insert("source-db-warehouse", "SYNC_WH");
    backend.insert("source-db-database", "ANALYTICS");
    backend.insert("source-db-schema", "PUBLIC");

    let store = CredentialStore::new(backend.clone(), Duration::from_secs(60));
    let names = SourceCredentialNames::default();

    let credentials = SourceCredentials::fetch(&store, &names).await.unwrap();
    assert_eq!(credentials.user, "svc_sync");
    assert_eq!(credentials.password.expose_secret(), "hunter2");
    assert_eq!(credentials.account, "org-account");
    assert_eq!(credentials.warehouse, "SYNC_WH");
    assert_eq!(credentials.database, "ANALYTICS");
    assert_eq!(credentials.schema, "PUBLIC");

    // A second resolve is served entirely from the cache.
    SourceCredentials::fetch(&store, &names).await.unwrap();
    assert_eq!(backend.fetch_count(), 6);
}
