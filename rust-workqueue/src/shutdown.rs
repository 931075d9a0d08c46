//! Shutdown signal handling.
//!
//! [`Shutdown::listen`] installs the SIGINT/SIGTERM handlers right away, so an
//! interrupt during connect or queue setup is recorded instead of killing the
//! process with the default signal action.

use tokio::sync::watch;
use tracing::{error, info};

/// Cloneable handle that resolves once shutdown was requested.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Install the signal handlers and start listening. Must be called from
    /// within a tokio runtime.
    pub fn listen() -> Self {
        let (tx, shutdown) = Self::manual();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            // Registration happens here, synchronously, not on first poll.
            let interrupt = signal(SignalKind::interrupt());
            let terminate = signal(SignalKind::terminate());

            tokio::spawn(async move {
                let (mut interrupt, mut terminate) = match (interrupt, terminate) {
                    (Ok(i), Ok(t)) => (i, t),
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "signal_handler_install_failed");
                        return;
                    }
                };

                tokio::select! {
                    _ = interrupt.recv() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
                let _ = tx.send(true);
            });
        }

        #[cfg(not(unix))]
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT");
                    let _ = tx.send(true);
                }
                Err(e) => error!(error = %e, "signal_handler_install_failed"),
            }
        });

        shutdown
    }

    /// A handle triggered by the returned sender instead of by signals.
    pub fn manual() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested. Returns immediately if it already was.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Listener gone without a request: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Owned future for the run loops.
    pub async fn requested(mut self) {
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_trigger_before_wait_is_not_lost() {
        let (tx, mut shutdown) = Shutdown::manual();
        tx.send(true).unwrap();

        assert!(shutdown.is_triggered());
        timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("wait should return at once");
    }

    #[tokio::test]
    async fn test_every_clone_observes_trigger() {
        let (tx, shutdown) = Shutdown::manual();
        let first = shutdown.clone().requested();
        let second = shutdown.requested();

        tx.send(true).unwrap();

        timeout(Duration::from_secs(1), async {
            first.await;
            second.await;
        })
        .await
        .expect("both handles should resolve");
    }

    #[tokio::test(start_paused = true)]
    async fn test_untriggered_wait_keeps_pending() {
        let (_tx, mut shutdown) = Shutdown::manual();
        assert!(timeout(Duration::from_secs(60), shutdown.wait()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_without_trigger_keeps_pending() {
        let (tx, mut shutdown) = Shutdown::manual();
        drop(tx);
        assert!(timeout(Duration::from_secs(60), shutdown.wait()).await.is_err());
    }
}
