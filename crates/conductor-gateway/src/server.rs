use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use conductor_core::config::GatewayConfig;

use crate::routes;
use crate::services::Services;
use crate::state::AppState;

/// REST gateway over a running engine, built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    services: Services,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, services: Services) -> Self {
        Self { config, services }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            services: self.services.clone(),
        });

        Router::new()
            .route("/api/health", get(routes::health))
            .route(
                "/api/workflows",
                get(routes::list_workflows).post(routes::register_workflow),
            )
            .route("/api/workflows/{id}/executions", post(routes::start_execution))
            .route("/api/executions", get(routes::list_executions))
            .route("/api/executions/{id}", get(routes::get_execution))
            .route(
                "/api/agents",
                get(routes::list_agents).post(routes::register_agent),
            )
            .route(
                "/api/sessions",
                get(routes::list_sessions).post(routes::create_session),
            )
            .route("/api/sessions/{id}", delete(routes::close_session))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
