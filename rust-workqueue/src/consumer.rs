//! RabbitMQ consumer loop.
//!
//! The worker holds at most one unacknowledged delivery: prefetch is 1 and
//! each delivery is processed and settled inline before the next one is
//! pulled from the stream. Shutdown is only honored between deliveries, so
//! the in-flight message is always acked or nacked first.

use std::future::Future;

use futures::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use tracing::{error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::processor::{process, Handler, Outcome};
use crate::queue::QueueSpec;

/// Unacknowledged deliveries the broker may push to this worker.
pub const PREFETCH_COUNT: u16 = 1;

/// Counters reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub acked: u64,
    pub nacked: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Ack => self.acked += 1,
            Outcome::Nack { .. } => self.nacked += 1,
        }
    }
}

/// Single-queue worker.
pub struct Worker {
    manager: ConnectionManager,
    queue: QueueSpec,
    consumer_tag: String,
}

impl Worker {
    pub fn new(manager: ConnectionManager, queue: QueueSpec, consumer_tag: impl Into<String>) -> Self {
        Self {
            manager,
            queue,
            consumer_tag: consumer_tag.into(),
        }
    }

    /// Consume until `shutdown` resolves.
    ///
    /// This function:
    /// 1. Sets QoS to a prefetch of one
    /// 2. Declares the queue (idempotent operation)
    /// 3. Processes deliveries one at a time, settling each by delivery tag
    /// 4. Cancels the consumer on shutdown so no new delivery is accepted
    pub async fn run<H, S>(&self, handler: &H, shutdown: S) -> Result<WorkerStats>
    where
        H: Handler,
        S: Future<Output = ()>,
    {
        let channel = self.manager.channel();

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        info!(prefetch_count = PREFETCH_COUNT, "rabbitmq_qos_set");

        self.manager.declare_queue(&self.queue).await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue.name,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %self.queue.name,
            consumer_tag = %self.consumer_tag,
            "rabbitmq_consumer_started"
        );
        info!("worker_ready");

        tokio::pin!(shutdown);
        let mut stats = WorkerStats::default();

        loop {
            let delivery = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("worker_stopping");
                    break;
                }
                delivery = consumer.next() => delivery,
            };

            match delivery {
                Some(Ok(delivery)) => {
                    let delivery_tag = delivery.delivery_tag;
                    let message_id = delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info!(
                        queue = %self.queue.name,
                        message_id = %message_id,
                        delivery_tag = delivery_tag,
                        redelivered = delivery.redelivered,
                        body_length = delivery.data.len(),
                        "worker_job_received"
                    );

                    let outcome = process(handler, &delivery.data).await;
                    settle(channel, delivery_tag, outcome).await?;
                    stats.record(outcome);

                    info!(
                        queue = %self.queue.name,
                        message_id = %message_id,
                        delivery_tag = delivery_tag,
                        outcome = ?outcome,
                        "worker_job_settled"
                    );
                }
                Some(Err(e)) => {
                    error!(error = %e, "rabbitmq_delivery_error");
                    return Err(e.into());
                }
                None => {
                    warn!(queue = %self.queue.name, "rabbitmq_consumer_closed");
                    return Err(Error::ConsumerClosed {
                        queue: self.queue.name.clone(),
                    });
                }
            }
        }

        // Anything already buffered client-side stays unacked and is requeued
        // by the broker when the channel closes.
        if let Err(e) = channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "rabbitmq_consumer_cancel_error");
        }

        info!(acked = stats.acked, nacked = stats.nacked, "worker_shutdown_complete");
        Ok(stats)
    }

    /// Close the underlying connection.
    pub async fn close(self) {
        self.manager.close().await;
    }
}

async fn settle(channel: &Channel, delivery_tag: u64, outcome: Outcome) -> Result<()> {
    let result = match outcome {
        Outcome::Ack => {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
        }
        Outcome::Nack { requeue } => {
            channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue,
                        ..Default::default()
                    },
                )
                .await
        }
    };

    result.map_err(|e| {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_settle_failed");
        Error::Broker(e)
    })
}
