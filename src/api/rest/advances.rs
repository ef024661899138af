use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::advances::{AdvanceService, CreateAdvanceRequest},
    services::errors::ServiceError,
};

pub fn router() -> Router {
    Router::new().route("/", get(list_advances).post(create_advance))
}

async fn list_advances(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = AdvanceService::new(state);
    let advances = service.list(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "advances": advances })))
}

async fn create_advance(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAdvanceRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = AdvanceService::new(state);
    let advance = service.create(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "advance": advance })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
