use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use self::rest::router as rest_router;

pub mod rest;

use crate::infrastructure::config::Config;

pub fn build_router(config: Arc<Config>) -> Router {
    Router::new()
        .nest("/api", rest_router())
        .layer(cors_layer(config.as_ref()))
        .layer(TraceLayer::new_for_http())
}

pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not_found"})),
    )
}

/// Without configured origins the dashboard is assumed to be served from the
/// same host and the layer stays permissive for tooling.
fn cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    if config.app.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .app
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(Any)
}
