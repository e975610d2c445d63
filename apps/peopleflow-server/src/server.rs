//! HTTP server implementation

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use peopleflow_webhook::billing_webhook_router;

use crate::app::AppState;
use crate::cli::Args;
use crate::routes::tenant_router;

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(_args: Args, state: AppState) -> Result<Self> {
        Ok(Self { state })
    }

    /// Serve until the shutdown token fires or Ctrl-C arrives.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        )
        .parse()
        .context("Invalid server address")?;

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        let signal = {
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        shutdown.cancel();
                    }
                }
            }
        };

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(signal)
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health_check))
            .merge(tenant_router(self.state.clone()))
            .merge(billing_webhook_router(self.state.webhooks.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

// Route handlers

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "PeopleFlow Tenancy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "PeopleFlow Tenancy");
    }

    #[tokio::test]
    async fn test_health_check_handler() {
        let status = health_check().await;
        assert_eq!(status, StatusCode::OK);
    }
}
