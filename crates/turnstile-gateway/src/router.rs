use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::SharedState;

/// The full HTTP surface. CORS is wide open since the frontend is
/// served from a different port on the same offline machine.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/api/health", get(routes::health))
        .route("/api/scan", post(routes::scan))
        .route("/api/upload", post(routes::upload))
        .route("/api/upload/history", get(routes::upload_history))
        .route("/api/stats", get(routes::stats))
        .route("/api/download", get(routes::download))
        .route("/api/gateways", get(routes::gateways))
        .route("/api/gateways/active", get(routes::active_gateways))
        .route("/api/gateways/register", post(routes::register_gateway))
        .route("/api/gateways/{id}/sync", post(routes::sync_gateway))
        .route("/api/config", get(routes::get_config).post(routes::set_config))
        .route("/api/version", get(routes::version))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
