//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Queue and message types for the single work queue
//! - Publisher with one-shot reconnect on connection loss
//!
//! ## Architecture
//!
//! ```text
//! Publisher → <queue> (durable, default exchange) → Worker (prefetch = 1)
//! ```

pub mod publisher;
pub mod types;

pub use publisher::Publisher;
pub use types::{DeclaredQueue, OutgoingMessage, QueueSpec};
