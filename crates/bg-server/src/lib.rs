pub mod auth;
pub mod error;
pub mod state;
pub mod sweeper;
pub mod tools;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with the tool endpoint and liveness probe.
/// Used by `main` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/tool", post(tools::call_tool))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
