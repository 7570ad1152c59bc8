pub mod config;

use std::path::Path;

use axum::{
    Json, Router,
    extract::{Request, State},
    routing::get,
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use kindred_api::AppState;

/// The whole HTTP surface: health check, `/api/v1`, and stored photos under `/uploads`.
pub fn build_app(state: AppState, upload_dir: &Path) -> Router {
    let health = Router::new()
        .route("/health", get(health))
        .with_state(state.clone());

    Router::new()
        .merge(health)
        .nest("/api/v1", kindred_api::router(state))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            // Path only: the WebSocket upgrade may carry a token in its query string
            tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
        }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.hub.stats().await;
    Json(json!({ "status": "ok", "sessions": stats.sessions }))
}
