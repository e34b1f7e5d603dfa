// Server module - router assembly and background tasks used by main.rs

use axum::Router;
use axum::http::HeaderValue;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::api_docs::ApiDoc;
use crate::config::{Config, ConnectorKind};
use crate::connector::{DryRunConnector, ExecutionConnector, HttpAgentConnector};
use crate::domain::DomainError;
use crate::infrastructure::AppState;
use crate::services::DeviceCommandQueue;

/// Build the full application router
pub fn build_router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    let mut origins = Vec::new();
    for origin in cors_allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(v) => origins.push(v),
            Err(e) => tracing::error!("Failed to parse CORS origin '{}': {}", origin, e),
        }
    }

    Router::new()
        .merge(SwaggerUi::new("/api/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api::api_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Pick the execution connector configured for this process
pub fn connector_from_config(config: &Config) -> Result<Arc<dyn ExecutionConnector>, DomainError> {
    match config.connector {
        ConnectorKind::Http => {
            tracing::info!(
                "🔌 Using HTTP agent connector (port {}, timeout {:?})",
                config.agent_port,
                config.agent_timeout
            );
            Ok(Arc::new(HttpAgentConnector::new(
                config.agent_port,
                config.agent_timeout,
            )?))
        }
        ConnectorKind::DryRun => {
            tracing::warn!("🔌 Using dry-run connector: no command reaches a device");
            Ok(Arc::new(DryRunConnector))
        }
    }
}

/// Periodically delete finished queue entries older than `retention`
pub fn spawn_queue_janitor(
    queue: DeviceCommandQueue,
    retention: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = queue.cleanup_old_entries(retention).await {
                tracing::error!("❌ Queue cleanup failed: {}", e);
            }
        }
    })
}
