//! Workqueue Worker - prefetch-1 RabbitMQ consumer.
//!
//! Pulls one message at a time from the work queue, simulates processing by
//! sleeping `PROCESSING_TIME_SECONDS`, and acks. Failed messages are nacked.
//! SIGINT/SIGTERM stops it after the in-flight message is settled.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workqueue::{shutdown::Shutdown, ConnectionManager, SimulatedWork, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    // Handlers go in before anything slow, so an early interrupt still exits 0
    let mut shutdown = Shutdown::listen();

    // Configuration problems stop us before any connection attempt
    let config = WorkerConfig::from_env().map_err(|e| {
        error!(error = %e, "config_invalid");
        e
    })?;
    info!(
        endpoint = %config.common.broker.endpoint(),
        queue = %config.common.queue.name,
        durable = config.common.queue.durable,
        processing_ms = config.processing_time.as_millis() as u64,
        "config_loaded"
    );

    let manager = tokio::select! {
        biased;
        _ = shutdown.wait() => {
            info!("worker_interrupted_before_connect");
            return Ok(());
        }
        connected = ConnectionManager::connect(config.common.broker.clone()) => connected
            .map_err(|e| {
                error!(error = %e, "rabbitmq_connect_failed");
                e
            })
            .context("Failed to connect to RabbitMQ")?,
    };

    let consumer_tag = format!("workqueue-worker-{}", std::process::id());
    let worker = Worker::new(manager, config.common.queue.clone(), consumer_tag);
    let handler = SimulatedWork::new(config.processing_time);

    let result = worker.run(&handler, shutdown.requested()).await;
    worker.close().await;

    match result {
        Ok(stats) => {
            info!(acked = stats.acked, nacked = stats.nacked, "worker_exited");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "worker_failed");
            Err(e).context("Worker stopped with an error")
        }
    }
}
