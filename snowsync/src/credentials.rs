//! Credential resolution with TTL caching and single-flight fetches.
//!
//! [`CredentialStore`] fronts an external secret backend with a process-wide
//! cache. A cache hit performs zero backend calls; concurrent misses for the
//! same name coalesce into one in-flight fetch that all callers wait on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secrecy::Secret;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SyncResult;

/// A secret value resolved from the backend.
pub type SecretValue = Secret<String>;

/// Backend capable of resolving named secrets.
///
/// Implementations are expected to fail with
/// [`crate::error::ErrorKind::CredentialUnavailable`] when the backend is
/// unreachable or the name is unknown.
pub trait SecretBackend: Send + Sync + 'static {
    /// Fetches the secret with the given name from the backend.
    fn fetch(&self, name: &str) -> impl Future<Output = SyncResult<SecretValue>> + Send;
}

/// A secret together with the instant it was fetched.
#[derive(Clone)]
struct CachedCredential {
    value: SecretValue,
    fetched_at: Instant,
}

type FetchResult = Option<SyncResult<SecretValue>>;

/// Cache slot for one secret name.
enum Slot {
    /// A resolved secret, valid until its TTL elapses.
    Ready(CachedCredential),
    /// A fetch is in flight; waiters subscribe to the receiver.
    Pending(watch::Receiver<FetchResult>),
}

struct Inner<B> {
    backend: B,
    ttl: Duration,
    // Critical sections are lock-insert-unlock; never held across an await.
    cache: Mutex<HashMap<String, Slot>>,
}

/// Clears a `Pending` slot if its fetch is dropped before publishing.
///
/// Without this, a cancelled fetcher would leave a dead slot behind and every
/// later `get` for the name would wait on a fetch that can never finish.
struct PendingFetchGuard<B> {
    inner: Arc<Inner<B>>,
    name: String,
    rx: watch::Receiver<FetchResult>,
    disarmed: bool,
}

impl<B> PendingFetchGuard<B> {
    fn disarm(mut self) {
        self.disarmed = true;
    }
}

impl<B> Drop for PendingFetchGuard<B> {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }

        let Ok(mut cache) = self.inner.cache.lock() else {
            return;
        };

        // Only remove the slot if it is still the one this fetch installed.
        if let Some(Slot::Pending(rx)) = cache.get(&self.name)
            && rx.same_channel(&self.rx)
        {
            cache.remove(&self.name);
        }
    }
}

/// Process-wide credential store.
///
/// Constructed once per process and shared by reference; cheap to clone.
pub struct CredentialStore<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for CredentialStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: SecretBackend> CredentialStore<B> {
    /// Default time-to-live for cached secrets.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Creates a store over the given backend with the given cache TTL.
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                ttl,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolves the secret with the given name.
    ///
    /// Checks the cache first; on miss or expiry, fetches from the backend and
    /// caches the result. Concurrent callers requesting the same name while a
    /// fetch is in flight wait on that fetch instead of triggering duplicate
    /// backend calls.
    pub async fn get(&self, name: &str) -> SyncResult<SecretValue> {
        loop {
            let claimed = {
                let mut cache = self
                    .inner
                    .cache
                    .lock()
                    .expect("credential cache lock poisoned");

                let in_flight = match cache.get(name) {
                    Some(Slot::Ready(cached)) if cached.fetched_at.elapsed() < self.inner.ttl => {
                        debug!(secret = name, "credential cache hit");
                        return Ok(cached.value.clone());
                    }
                    Some(Slot::Pending(rx)) => Some(rx.clone()),
                    _ => None,
                };

                match in_flight {
                    Some(rx) => Err(rx),
                    None => {
                        // Miss or expired entry: this caller becomes the fetcher.
                        let (tx, rx) = watch::channel(None);
                        cache.insert(name.to_string(), Slot::Pending(rx.clone()));
                        Ok((tx, rx))
                    }
                }
            };

            let (publish_tx, pending_rx) = match claimed {
                Ok(channel) => channel,
                Err(rx) => match Self::wait_for_in_flight(name, rx).await {
                    Some(result) => return result,
                    // The fetcher was cancelled before publishing; start over
                    // so this caller can claim the fetch itself.
                    None => continue,
                },
            };

            let guard = PendingFetchGuard {
                inner: Arc::clone(&self.inner),
                name: name.to_string(),
                rx: pending_rx,
                disarmed: false,
            };

            info!(secret = name, "fetching credential from secret backend");
            let result = self.inner.backend.fetch(name).await;

            {
                let mut cache = self
                    .inner
                    .cache
                    .lock()
                    .expect("credential cache lock poisoned");
                match &result {
                    Ok(value) => {
                        cache.insert(
                            name.to_string(),
                            Slot::Ready(CachedCredential {
                                value: value.clone(),
                                fetched_at: Instant::now(),
                            }),
                        );
                    }
                    Err(_) => {
                        // Failed fetches are not cached, the next caller retries.
                        cache.remove(name);
                    }
                }
            }

            // The pending slot has been settled either way.
            guard.disarm();

            let _ = publish_tx.send(Some(result.clone()));

            return result;
        }
    }

    /// Removes the cached value for the given name, forcing a refetch on the
    /// next [`CredentialStore::get`].
    pub fn invalidate(&self, name: &str) {
        let mut cache = self
            .inner
            .cache
            .lock()
            .expect("credential cache lock poisoned");
        if matches!(cache.get(name), Some(Slot::Ready(_))) {
            cache.remove(name);
            info!(secret = name, "credential invalidated");
        }
    }

    /// Waits for an in-flight fetch started by another caller.
    ///
    /// Returns `None` when the fetcher was dropped without publishing, in
    /// which case the caller should retry and claim the fetch itself.
    async fn wait_for_in_flight(
        name: &str,
        mut rx: watch::Receiver<FetchResult>,
    ) -> Option<SyncResult<SecretValue>> {
        debug!(secret = name, "waiting on in-flight credential fetch");

        loop {
            if let Some(result) = rx.borrow().clone() {
                return Some(result);
            }

            if rx.changed().await.is_err() {
                // The sender is gone; a final value may still have landed.
                if let Some(result) = rx.borrow().clone() {
                    return Some(result);
                }

                warn!(
                    secret = name,
                    "in-flight credential fetch was abandoned, retrying"
                );
                return None;
            }
        }
    }
}

/// Names of the secrets holding the source warehouse connection parameters.
#[derive(Clone, Debug)]
pub struct SourceCredentialNames {
    pub user: String,
    pub password: String,
    pub account: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
}

impl Default for SourceCredentialNames {
    fn default() -> Self {
        Self {
            user: "source-db-user".to_string(),
            password: "source-db-password".to_string(),
            account: "source-db-account".to_string(),
            warehouse: "source-db-warehouse".to_string(),
            database: "source-db-database".to_string(),
            schema: "source-db-schema".to_string(),
        }
    }
}

/// Fully resolved source warehouse connection parameters.
///
/// Only the password stays wrapped; the remaining parameters are connection
/// metadata rather than secrets.
pub struct SourceCredentials {
    pub user: String,
    pub password: SecretValue,
    pub account: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
}

impl SourceCredentials {
    /// Resolves the full connection parameter set through the store.
    pub async fn fetch<B: SecretBackend>(
        store: &CredentialStore<B>,
        names: &SourceCredentialNames,
    ) -> SyncResult<Self> {
        use secrecy::ExposeSecret;

        let (user, password, account, warehouse, database, schema) = tokio::try_join!(
            store.get(&names.user),
            store.get(&names.password),
            store.get(&names.account),
            store.get(&names.warehouse),
            store.get(&names.database),
            store.get(&names.schema),
        )?;

        Ok(Self {
            user: user.expose_secret().clone(),
            password,
            account: account.expose_secret().clone(),
            warehouse: warehouse.expose_secret().clone(),
            database: database.expose_secret().clone(),
            schema: schema.expose_secret().clone(),
        })
    }
}

/// In-memory secret backend for testing and development purposes.
///
/// Supports injecting fetch latency (to exercise single-flight behavior) and
/// counting backend calls.
#[derive(Clone, Default)]
pub struct MemorySecretBackend {
    secrets: Arc<std::sync::Mutex<HashMap<String, String>>>,
    fetches: Arc<std::sync::atomic::AtomicUsize>,
    fetch_delay: Option<Duration>,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an artificial delay applied to every fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Inserts or replaces a secret.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .lock()
            .expect("secret map lock poisoned")
            .insert(name.into(), value.into());
    }

    /// Number of backend fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl SecretBackend for MemorySecretBackend {
    async fn fetch(&self, name: &str) -> SyncResult<SecretValue> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        self.fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let secrets = self.secrets.lock().expect("secret map lock poisoned");
        match secrets.get(name) {
            Some(value) => Ok(Secret::new(value.clone())),
            None => Err(crate::sync_error!(
                crate::error::ErrorKind::CredentialUnavailable,
                "Secret not found",
                format!("no secret named `{name}` in the backend")
            )),
        }
    }
}
