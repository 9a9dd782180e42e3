#![allow(dead_code)]

use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/assignments", assignment_routes())
        .nest("/api/v1/submissions", submission_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn assignment_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/{id}/open", post(handlers::assignments::open_assignment))
        .route("/{id}/progress", get(handlers::progress::get_progress))
        .route(
            "/{id}/progress/advance",
            post(handlers::progress::advance_phase),
        )
        .route("/{id}/progress/jump", post(handlers::progress::jump_phase))
}

fn submission_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/{id}/answers/{question_id}",
            put(handlers::assignments::save_answer),
        )
        .route(
            "/{id}/finalize",
            post(handlers::assignments::finalize_submission),
        )
}
