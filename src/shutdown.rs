//! Process shutdown: OS signals fan out through a watch channel, then the
//! service tasks get a bounded window to drain in-flight dispatches.

use std::time::Duration;

use futures::future::join_all;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Broadcasts a one-way "stop" flag to every subscribed task.
pub struct ShutdownHandler {
    tx: watch::Sender<bool>,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver that resolves `changed()` once shutdown starts. Late
    /// subscribers observe the current flag immediately.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Start shutdown. Calling it again has no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Block until SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let name = next_signal().await;
        info!(signal = name, "Shutdown signal received");
        self.trigger();
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of the first termination signal delivered to the process.
///
/// A listener that fails to install is logged and never fires, so the
/// remaining one still works.
async fn next_signal() -> &'static str {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}

/// Wait up to `limit` for the service tasks to finish. Returns whether all of
/// them did; stragglers keep running until the runtime exits.
pub async fn drain(limit: Duration, tasks: Vec<JoinHandle<()>>) -> bool {
    let count = tasks.len();
    match timeout(limit, join_all(tasks)).await {
        Ok(results) => {
            let panicked = results.iter().filter(|r| r.is_err()).count();
            if panicked > 0 {
                warn!(panicked, "Service tasks ended abnormally during shutdown");
            }
            info!(tasks = count, "Shutdown drain completed");
            true
        }
        Err(_) => {
            warn!(
                tasks = count,
                timeout_secs = limit.as_secs(),
                "Shutdown drain timed out with dispatches still in flight"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let handler = ShutdownHandler::new();
        let mut early = handler.subscribe();
        assert!(!*early.borrow());

        handler.trigger();
        handler.trigger();

        early.changed().await.unwrap();
        assert!(*early.borrow());
        // Subscribing after the fact still sees the flag.
        assert!(*handler.subscribe().borrow());
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let handler = ShutdownHandler::default();
        let mut rx = handler.subscribe();
        let task = tokio::spawn(async move {
            let _ = rx.changed().await;
        });

        handler.trigger();
        assert!(drain(Duration::from_secs(1), vec![task]).await);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        assert!(!drain(Duration::from_millis(20), vec![stuck]).await);
    }

    #[tokio::test]
    async fn test_drain_tolerates_panicked_task() {
        let crashed = tokio::spawn(async {
            panic!("boom");
        });
        assert!(drain(Duration::from_secs(1), vec![crashed]).await);
    }

    #[tokio::test]
    async fn test_drain_with_no_tasks() {
        assert!(drain(Duration::from_millis(10), Vec::new()).await);
    }
}
