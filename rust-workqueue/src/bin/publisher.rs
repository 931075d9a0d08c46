//! Workqueue Publisher - fixed-interval RabbitMQ producer.
//!
//! Publishes `Hello from producer - <uuid>` to the work queue every
//! `PUBLISH_INTERVAL_SECONDS` until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workqueue::{shutdown::Shutdown, ConnectionManager, OutgoingMessage, Publisher, PublisherConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("publisher_starting");

    // Handlers go in before anything slow, so an early interrupt still exits 0
    let mut shutdown = Shutdown::listen();

    let config = PublisherConfig::from_env().map_err(|e| {
        error!(error = %e, "config_invalid");
        e
    })?;
    info!(
        endpoint = %config.common.broker.endpoint(),
        queue = %config.common.queue.name,
        interval_ms = config.publish_interval.as_millis() as u64,
        "config_loaded"
    );

    let manager = tokio::select! {
        biased;
        _ = shutdown.wait() => {
            info!(sent = 0, "publisher_exited");
            return Ok(());
        }
        connected = ConnectionManager::connect(config.common.broker.clone()) => connected
            .map_err(|e| {
                error!(error = %e, "rabbitmq_connect_failed");
                e
            })
            .context("Failed to connect to RabbitMQ")?,
    };

    let mut publisher = Publisher::new(manager, config.common.queue.clone());

    let result = publisher
        .run(
            config.publish_interval,
            OutgoingMessage::greeting,
            shutdown.requested(),
        )
        .await;
    publisher.close().await;

    let sent = result.context("Publisher stopped with an error")?;
    info!(sent = sent, "publisher_exited");
    Ok(())
}
