pub mod dto;
pub mod errors;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;
pub use state::{AppState, ServiceSettings};

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/status", get(handlers::get_status))
        .route("/api/shelly", post(handlers::post_control))
        .route("/api/cache-stats", get(handlers::cache_stats))
        .route(
            "/api/cron/check-light-schedule",
            get(handlers::check_light_schedule),
        )
        .route("/api/cron", get(handlers::collect_reading))
        .route(
            "/api/light-schedule",
            get(handlers::get_schedule).post(handlers::update_schedule),
        )
        .route("/api/events", get(handlers::get_events))
        .route("/api/history", get(handlers::get_history))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
