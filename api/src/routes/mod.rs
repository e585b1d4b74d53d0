mod connections;
mod triggers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/connections",
            get(connections::list_connections).post(connections::create_connection),
        )
        .route("/api/connections/test", post(connections::test_config))
        .route(
            "/api/connections/:id",
            get(connections::get_connection)
                .put(connections::update_connection)
                .delete(connections::delete_connection),
        )
        .route("/api/connections/:id/test", post(connections::test_connection))
        .route("/api/connections/:id/sync", post(triggers::start_sync))
        .route(
            "/api/connections/:id/suggestions",
            post(triggers::start_suggestion_generation),
        )
        .route("/api/runs/:id", get(triggers::get_run))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
