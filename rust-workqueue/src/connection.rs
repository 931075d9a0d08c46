//! Broker connection management.
//!
//! One connection and one channel per process, owned by a
//! [`ConnectionManager`] that is built once at startup and handed to the
//! publisher or worker loop.

use lapin::{
    options::QueueDeclareOptions,
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::BrokerSettings;
use crate::error::{Error, Result};
use crate::queue::{DeclaredQueue, QueueSpec};

/// Owns the broker connection and its single channel.
pub struct ConnectionManager {
    settings: BrokerSettings,
    backoff: Backoff,
    connection: Connection,
    channel: Channel,
}

impl ConnectionManager {
    /// Connect with the default backoff (1s base, 30s cap, ±20% jitter).
    pub async fn connect(settings: BrokerSettings) -> Result<Self> {
        Self::connect_with(settings, Backoff::default()).await
    }

    pub async fn connect_with(settings: BrokerSettings, backoff: Backoff) -> Result<Self> {
        let (connection, channel) = open(&settings, &backoff).await?;
        Ok(Self {
            settings,
            backoff,
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Declare the queue. Safe to repeat with identical properties; a queue
    /// that already exists with different ones yields [`Error::QueueMismatch`].
    pub async fn declare_queue(&self, spec: &QueueSpec) -> Result<DeclaredQueue> {
        let queue = self
            .channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                if is_precondition_failed(&e) {
                    Error::QueueMismatch {
                        queue: spec.name.clone(),
                        source: e,
                    }
                } else {
                    Error::Broker(e)
                }
            })?;

        let declared = DeclaredQueue {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        };

        info!(
            queue = %declared.name,
            durable = spec.durable,
            message_count = declared.message_count,
            consumer_count = declared.consumer_count,
            "rabbitmq_queue_declared"
        );

        Ok(declared)
    }

    /// Drop the current connection and establish a fresh one, with backoff.
    ///
    /// Channel-level state (qos, confirm mode, consumers) is not carried over.
    pub async fn reconnect(&mut self) -> Result<()> {
        if let Err(e) = self.connection.close(320, "Reconnecting").await {
            debug!(error = %e, "rabbitmq_stale_connection_close_error");
        }

        let (connection, channel) = open(&self.settings, &self.backoff).await?;
        self.connection = connection;
        self.channel = channel;
        Ok(())
    }

    /// Close the channel, then the connection. Errors are logged, not returned.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!("rabbitmq_connection_closed");
    }
}

/// Whether an error means the connection or channel is gone, so that a
/// reconnect has a chance of fixing it.
pub fn is_connection_error(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_) => true,
        lapin::Error::ProtocolError(e) => matches!(e.kind(), AMQPErrorKind::Hard(_)),
        _ => false,
    }
}

fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(e) => matches!(
            e.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        ),
        _ => false,
    }
}

async fn open(settings: &BrokerSettings, backoff: &Backoff) -> Result<(Connection, Channel)> {
    let endpoint = settings.endpoint();
    let mut attempt: u32 = 0;

    loop {
        info!(endpoint = %endpoint, attempt = attempt + 1, "rabbitmq_connecting");

        match try_open(settings).await {
            Ok(pair) => {
                info!(endpoint = %endpoint, "rabbitmq_connected");
                return Ok(pair);
            }
            Err(e) if attempt < settings.connect_retries && is_connection_error(&e) => {
                let delay = backoff.delay(attempt);
                warn!(
                    endpoint = %endpoint,
                    attempt = attempt + 1,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "rabbitmq_connect_failed_retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::Connection {
                    endpoint,
                    attempts: attempt + 1,
                    source: e,
                });
            }
        }
    }
}

async fn try_open(settings: &BrokerSettings) -> lapin::Result<(Connection, Channel)> {
    let connection =
        Connection::connect_uri(settings.uri.clone(), ConnectionProperties::default()).await?;

    match connection.create_channel().await {
        Ok(channel) => {
            info!(channel_id = channel.id(), "rabbitmq_channel_created");
            Ok((connection, channel))
        }
        Err(e) => {
            let _ = connection.close(200, "Channel creation failed").await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use lapin::protocol::{AMQPError, AMQPHardError};

    #[test]
    fn test_io_error_is_connection_error() {
        let err = lapin::Error::IOError(Arc::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(is_connection_error(&err));
        assert!(!is_precondition_failed(&err));
    }

    #[test]
    fn test_hard_protocol_error_is_connection_error() {
        let err = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED),
            "CONNECTION_FORCED".into(),
        ));
        assert!(is_connection_error(&err));
    }

    #[test]
    fn test_precondition_failed_is_queue_mismatch_not_connection_error() {
        let err = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            "PRECONDITION_FAILED - inequivalent arg 'durable'".into(),
        ));
        assert!(is_precondition_failed(&err));
        assert!(!is_connection_error(&err));
    }

    #[test]
    fn test_channel_limit_is_not_connection_error() {
        assert!(!is_connection_error(&lapin::Error::ChannelsLimitReached));
    }
}
