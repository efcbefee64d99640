//! Service assembly: credentials, pool, destination, runner, HTTP server.

use std::net::TcpListener;
use std::time::Duration;

use actix_web::{App, HttpServer, dev::Server, web::Data};
use secrecy::ExposeSecret;
use snowsync::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use snowsync::credentials::{
    CredentialStore, SecretBackend, SourceCredentialNames, SourceCredentials,
};
use snowsync::destination::bigquery::BigQueryDestination;
use snowsync::engine::{MemorySwapIntentStore, SyncSettings, recover_pending_swaps};
use snowsync::error::ErrorKind;
use snowsync::pool::ConnectionPool;
use snowsync::runner::PipelineRunner;
use snowsync::source::SnowflakeConnector;
use snowsync::status::StatusReporter;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::config::ServiceConfig;
use crate::notification::WebhookNotificationClient;
use crate::routes::{
    AppState, health_check, read_all_statuses, read_pipeline_status, trigger_sync,
};
use crate::secrets::EnvSecretBackend;

/// Sync service wrapper managing the HTTP server lifecycle.
pub struct Application {
    port: u16,
    server: Server,
    shutdown_tx: ShutdownTx,
}

impl Application {
    /// Resolves credentials, connects the destination, and binds the server.
    pub async fn build(config: ServiceConfig) -> anyhow::Result<Self> {
        let credential_store = CredentialStore::new(
            EnvSecretBackend::new(),
            Duration::from_secs(config.credentials.ttl_secs),
        );
        let credential_names = SourceCredentialNames::default();
        let credentials =
            SourceCredentials::fetch(&credential_store, &credential_names).await?;

        let connector = SnowflakeConnector::new(&credentials)?;
        let pool = ConnectionPool::from_config(connector, &config.pool);

        let destination = BigQueryDestination::from_config(&config.destination).await?;

        let intents = MemorySwapIntentStore::new();
        let recovered = recover_pending_swaps(&intents, &destination).await?;
        if recovered > 0 {
            info!(recovered, "completed interrupted staging swaps at startup");
        }

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let runner = PipelineRunner::new(
            config.pipelines.clone(),
            pool,
            destination,
            intents,
            SyncSettings::from(&config.engine),
            shutdown_rx,
        );
        let reporter = StatusReporter::new(config.pipelines.clone(), runner.registry());
        let notifier = resolve_notifier(&credential_store).await?;

        let state = AppState {
            runner,
            reporter,
            notifier,
        };

        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let server = run(listener, state)?;

        Ok(Self {
            port,
            server,
            shutdown_tx,
        })
    }

    /// Returns the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Runs the server until it stops, cancelling in-flight syncs on the way
    /// out.
    ///
    /// A termination signal stops accepting requests; the shutdown channel
    /// asks running syncs to stop at their next batch boundary so the worker
    /// drain stays short.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let shutdown_tx = self.shutdown_tx;
        actix_web::rt::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("termination signal received, cancelling in-flight syncs");
                let _ = shutdown_tx.send(true);
            }
        });

        self.server.await
    }
}

/// Secret name holding the failure webhook endpoint.
const ALERT_WEBHOOK_SECRET: &str = "alert-webhook-url";

/// Resolves the failure webhook URL through the credential store.
///
/// An absent secret disables notifications instead of failing startup; any
/// other resolution error is fatal.
async fn resolve_notifier<B: SecretBackend>(
    store: &CredentialStore<B>,
) -> anyhow::Result<Option<WebhookNotificationClient>> {
    match store.get(ALERT_WEBHOOK_SECRET).await {
        Ok(url) => Ok(Some(WebhookNotificationClient::new(
            url.expose_secret().clone(),
        ))),
        Err(err) if err.kind() == ErrorKind::CredentialUnavailable => {
            info!("no alert webhook secret configured, failure notifications disabled");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Configures and starts the HTTP server with all routes and middleware.
fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let state = Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .service(health_check)
            .service(trigger_sync)
            .service(read_all_statuses)
            .service(read_pipeline_status)
    })
    .listen(listener)?
    .run();

    Ok(server)
}
