pub mod handlers;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::history::store::HistoryStore;
use crate::pipeline::EventHub;

/// Read-only view of the engine shared with request handlers.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryStore>,
    pub hub: Arc<EventHub>,
    pub replay_count: usize,
}

pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/transactions", get(handlers::list_transactions))
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transaction_by_id),
        )
        .route("/api/v1/alerts", get(handlers::list_alerts))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
