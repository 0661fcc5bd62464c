use anyhow::Context;
use tracing::{error, info};

use messenger_relay::api::ApiServer;
use messenger_relay::config::AppConfig;
use messenger_relay::services::ServiceContainer;
use messenger_relay::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;

    let (log_control, _log_guard) =
        logging::init_logging(&config.logging.dir, config.logging.filter.as_deref())
            .context("initializing logging")?;
    panic_hook::install();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting messenger-relay");

    let container = ServiceContainer::new(config.clone())
        .await
        .context("initializing services")?;
    log_control.start_retention_cleanup(container.cancellation_token());

    let server = ApiServer::new(
        config.server.clone(),
        container.app_state(),
        container.cancellation_token(),
    );

    let shutdown_token = container.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C, shutting down");
        shutdown_token.cancel();
    });

    let served = server.run().await;

    container.shutdown().await;
    served.context("running webhook server")?;

    info!("messenger-relay stopped");
    Ok(())
}
