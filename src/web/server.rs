use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;
use crate::scheduler::Orchestrator;

use super::api::{get_window_summary, health_check, list_batches, AppState};

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = Arc::new(AppState {
        orchestrator,
        start_time: std::time::Instant::now(),
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/api/groups/:group_id/summary", get(get_window_summary))
        .route("/api/groups/:group_id/batches", get(list_batches))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status API until `shutdown` is cancelled
pub async fn run_server(
    orchestrator: Arc<Orchestrator>,
    web_config: WebConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Status API listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Status API shutting down gracefully");
        })
        .await?;

    Ok(())
}
