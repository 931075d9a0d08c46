//! Queue and message types.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Queue identity. Every declarer must use identical properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

impl QueueSpec {
    /// A durable queue with the given name.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// Broker's answer to a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    /// Messages ready for delivery
    pub message_count: u32,
    pub consumer_count: u32,
}

/// A message about to be published.
///
/// The body is opaque; `id` travels as the AMQP `message_id` property and
/// `timestamp` (unix seconds) as the `timestamp` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub id: Uuid,
    pub timestamp: u64,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: unix_now(),
            body: body.into(),
        }
    }

    /// Reference body: a fixed tag followed by the message's own UUID.
    pub fn greeting() -> Self {
        let mut message = Self::new(Vec::new());
        message.body = format!("Hello from producer - {}", message.id).into_bytes();
        message
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_embeds_message_id() {
        let message = OutgoingMessage::greeting();
        let body = String::from_utf8(message.body.clone()).unwrap();
        assert_eq!(body, format!("Hello from producer - {}", message.id));
    }

    #[test]
    fn test_messages_get_distinct_ids() {
        let a = OutgoingMessage::new("a");
        let b = OutgoingMessage::new("a");
        assert_ne!(a.id, b.id);
        assert!(a.timestamp > 0);
    }

    #[test]
    fn test_queue_spec_durable() {
        let spec = QueueSpec::durable("jobs");
        assert_eq!(spec.name, "jobs");
        assert!(spec.durable);
    }
}
