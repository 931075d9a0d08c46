//! Message processing - the step between receiving a delivery and settling it.
//!
//! A [`Handler`] does the application work for one body. [`process`] runs it
//! and turns whatever happens into an [`Outcome`], so a failing or panicking
//! handler never takes the worker down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::sleep;
use tracing::{error, info};

use crate::error::ProcessingError;

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    /// `requeue: false` lets the broker dead-letter or drop the message.
    Nack { requeue: bool },
}

/// Application work for a single message body.
pub trait Handler {
    fn handle(&self, body: &[u8]) -> impl Future<Output = Result<(), ProcessingError>> + Send;
}

/// Run the handler for one body and decide how to settle the delivery.
///
/// Bodies that fail to decode are nacked without requeue (redelivering them
/// can never succeed). Any other failure, panics included, is nacked with
/// requeue so the broker hands the message out again.
pub async fn process<H: Handler>(handler: &H, body: &[u8]) -> Outcome {
    let result = AssertUnwindSafe(handler.handle(body)).catch_unwind().await;

    match result {
        Ok(Ok(())) => Outcome::Ack,
        Ok(Err(ProcessingError::Decode(e))) => {
            error!(error = %e, body_length = body.len(), "worker_job_decode_failed");
            Outcome::Nack { requeue: false }
        }
        Ok(Err(e)) => {
            error!(error = %e, "worker_job_failed");
            Outcome::Nack { requeue: true }
        }
        Err(_) => {
            error!("worker_job_panicked");
            Outcome::Nack { requeue: true }
        }
    }
}

/// Reference handler: decode the body as UTF-8, log it, then sleep for the
/// configured processing time.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    pub processing_time: Duration,
}

impl SimulatedWork {
    pub fn new(processing_time: Duration) -> Self {
        Self { processing_time }
    }
}

impl Handler for SimulatedWork {
    async fn handle(&self, body: &[u8]) -> Result<(), ProcessingError> {
        let text = std::str::from_utf8(body)?;
        info!(
            body = %text,
            processing_ms = self.processing_time.as_millis() as u64,
            "worker_processing_message"
        );

        sleep(self.processing_time).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    struct Failing;

    impl Handler for Failing {
        async fn handle(&self, _body: &[u8]) -> Result<(), ProcessingError> {
            Err(ProcessingError::Failed("boom".to_string()))
        }
    }

    struct Panicking;

    impl Handler for Panicking {
        async fn handle(&self, _body: &[u8]) -> Result<(), ProcessingError> {
            panic!("handler bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_work_acks_after_processing_time() {
        let handler = SimulatedWork::new(Duration::from_secs(3));
        let started = Instant::now();

        let outcome = process(&handler, b"Hello from producer - 42").await;

        assert_eq!(outcome, Outcome::Ack);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_zero_processing_time_acks_immediately() {
        let handler = SimulatedWork::new(Duration::ZERO);
        assert_eq!(process(&handler, b"hi").await, Outcome::Ack);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_nacked_without_requeue() {
        let handler = SimulatedWork::new(Duration::ZERO);
        let outcome = process(&handler, &[0xc3, 0x28]).await;
        assert_eq!(outcome, Outcome::Nack { requeue: false });
    }

    #[tokio::test]
    async fn test_handler_error_is_nacked_with_requeue() {
        assert_eq!(process(&Failing, b"x").await, Outcome::Nack { requeue: true });
    }

    #[tokio::test]
    async fn test_handler_panic_is_nacked_with_requeue() {
        assert_eq!(process(&Panicking, b"x").await, Outcome::Nack { requeue: true });
    }

    // Test builds always unwind, so the release profile has to be checked
    // directly: with panic = "abort" a handler panic kills the worker unsettled.
    #[test]
    fn test_release_profile_unwinds_on_panic() {
        let manifest = include_str!("../../Cargo.toml");
        let aborts = manifest
            .lines()
            .map(str::trim)
            .any(|line| line.starts_with("panic") && line.contains("abort"));
        assert!(!aborts, "workspace profile must not set panic = \"abort\"");
    }
}
