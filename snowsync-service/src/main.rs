mod config;
mod notification;
mod routes;
mod secrets;
mod startup;

use anyhow::Context;
use snowsync_config::load_config;
use snowsync_telemetry::tracing::init_tracing;
use tracing::info;

use crate::config::ServiceConfig;
use crate::startup::Application;

fn main() -> anyhow::Result<()> {
    init_tracing(env!("CARGO_BIN_NAME"));

    actix_web::rt::System::new().block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let config =
        load_config::<ServiceConfig>().context("failed to load the service configuration")?;

    let application = Application::build(config)
        .await
        .context("failed to build the sync service")?;
    info!(port = application.port(), "sync service listening");

    application
        .run_until_stopped()
        .await
        .context("the sync service failed while running")?;

    Ok(())
}
