//! Error types shared by the publisher and the worker.
//!
//! Broker failures are wrapped at the library boundary; the binaries turn
//! them into `anyhow` reports and a non-zero exit status.

use std::str::Utf8Error;

use thiserror::Error;

/// Invalid or missing configuration. Always fatal, raised before connecting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(var: &'static str, reason: impl Into<String>) -> Self {
        Self {
            var,
            reason: reason.into(),
        }
    }
}

/// Broker-side failures surfaced by the connection manager, publisher and worker.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting kept failing after every backoff attempt.
    #[error("failed to connect to {endpoint} after {attempts} attempts: {source}")]
    Connection {
        endpoint: String,
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    /// The queue already exists with incompatible properties.
    #[error("queue `{queue}` exists with incompatible properties: {source}")]
    QueueMismatch {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker rejected message published to `{queue}`")]
    PublishNacked { queue: String },

    #[error("consumer on `{queue}` was closed by the broker")]
    ConsumerClosed { queue: String },

    #[error("broker operation failed: {0}")]
    Broker(#[from] lapin::Error),
}

/// Per-message failure. Recovered by a nack, never fatal to the worker.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("message body is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),

    #[error("processing failed: {0}")]
    Failed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
