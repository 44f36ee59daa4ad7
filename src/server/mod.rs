//! HTTP surface: the notification trigger plus health and metrics endpoints.

pub mod health;
pub mod notifications;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::ServerConfig;
use crate::engine::DispatchEngine;
use crate::error::Result;
use crate::metrics::Metrics;

/// State shared by all handlers.
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    /// `None` when metrics are disabled.
    pub metrics: Option<Arc<Metrics>>,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/notifications", post(notifications::dispatch_handler))
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

/// HTTP server.
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(
        config: ServerConfig,
        engine: Arc<DispatchEngine>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(AppState { engine, metrics }),
        }
    }

    /// Serve until shutdown is signaled, then drain in-flight requests.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::spawn_server;
    use std::time::Duration;

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let (addr, shutdown_tx) = spawn_server(true, None).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = client
            .get(format!("http://{addr}/health"))
            .timeout(Duration::from_millis(500))
            .send()
            .await;
        assert!(result.is_err());
    }
}
