//! RabbitMQ publisher for the work queue.
//!
//! Publishes are confirmed by the broker. A publish that fails because the
//! connection went away is retried exactly once on a fresh connection; any
//! other failure is returned to the caller.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties,
};
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::types::{OutgoingMessage, QueueSpec};
use crate::connection::{is_connection_error, ConnectionManager};
use crate::error::{Error, Result};

/// Publisher bound to one queue on one connection.
pub struct Publisher {
    manager: ConnectionManager,
    queue: QueueSpec,
    ready: bool,
}

impl Publisher {
    pub fn new(manager: ConnectionManager, queue: QueueSpec) -> Self {
        Self {
            manager,
            queue,
            ready: false,
        }
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Put the channel in confirm mode and declare the queue, once per channel.
    pub async fn ensure_ready(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }

        self.manager
            .channel()
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        self.manager.declare_queue(&self.queue).await?;
        self.ready = true;
        Ok(())
    }

    /// Publish one message and wait for the broker confirm.
    pub async fn publish(&mut self, message: &OutgoingMessage) -> Result<()> {
        self.ensure_ready().await?;

        match self.try_publish(message).await {
            Err(Error::Broker(e)) if is_connection_error(&e) => {
                warn!(
                    queue = %self.queue.name,
                    message_id = %message.id,
                    error = %e,
                    "rabbitmq_publish_connection_lost"
                );
                self.ready = false;
                self.manager.reconnect().await?;
                self.ensure_ready().await?;
                self.try_publish(message).await
            }
            other => other,
        }
    }

    async fn try_publish(&self, message: &OutgoingMessage) -> Result<()> {
        let confirmation = self
            .manager
            .channel()
            .basic_publish(
                "",
                &self.queue.name,
                BasicPublishOptions::default(),
                &message.body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("text/plain".into())
                    .with_message_id(message.id.to_string().into())
                    .with_timestamp(message.timestamp),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(Error::PublishNacked {
                queue: self.queue.name.clone(),
            });
        }

        info!(
            queue = %self.queue.name,
            message_id = %message.id,
            body_length = message.body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Publish a message from `next_message` every `interval` until
    /// `shutdown` resolves. Returns how many messages were sent.
    ///
    /// Shutdown is checked before every publish and cuts the sleep short; a
    /// publish in progress always completes first. Publish errors end the loop.
    pub async fn run<M, S>(&mut self, interval: Duration, mut next_message: M, shutdown: S) -> Result<u64>
    where
        M: FnMut() -> OutgoingMessage,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            queue = %self.queue.name,
            interval_ms = interval.as_millis() as u64,
            "publisher_ready"
        );

        let mut sent: u64 = 0;
        loop {
            if (&mut shutdown).now_or_never().is_some() {
                info!(sent = sent, "publisher_stopping");
                break;
            }

            let message = next_message();
            if let Err(e) = self.publish(&message).await {
                error!(
                    queue = %self.queue.name,
                    message_id = %message.id,
                    sent = sent,
                    error = %e,
                    "rabbitmq_publish_failed"
                );
                return Err(e);
            }
            sent += 1;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(sent = sent, "publisher_stopping");
                    break;
                }
                _ = sleep(interval) => {}
            }
        }

        Ok(sent)
    }

    /// Close the underlying connection.
    pub async fn close(self) {
        self.manager.close().await;
        info!("rabbitmq_publisher_closed");
    }
}
