//! Workqueue - durable RabbitMQ work queue with a prefetch-1 worker.
//!
//! This library provides shared modules for the two binaries:
//! - `workqueue-publisher`: publishes a message to the queue at a fixed interval
//! - `workqueue-worker`: processes messages one at a time and acks or nacks them
//!
//! ## Architecture
//!
//! ```text
//! Publisher → <QUEUE_NAME> (durable) → Worker (prefetch = 1)
//! ```
//!
//! Delivery is at-least-once: a worker that dies mid-message never acks it and
//! the broker hands it out again.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod processor;
pub mod queue;
pub mod shutdown;

// Re-export commonly used types
pub use config::{Config, PublisherConfig, WorkerConfig};
pub use connection::ConnectionManager;
pub use consumer::{Worker, WorkerStats, PREFETCH_COUNT};
pub use error::{ConfigError, Error, ProcessingError};
pub use processor::{process, Handler, Outcome, SimulatedWork};
pub use queue::{DeclaredQueue, OutgoingMessage, Publisher, QueueSpec};
