//! Units and residents. Routes are merged at the `/api` level because the
//! resource spans two path roots (`/operational-units`, `/residents`).

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::directory::{CreateResidentRequest, CreateUnitRequest, DirectoryService},
    services::errors::ServiceError,
};

pub fn router() -> Router {
    Router::new()
        .route("/operational-units", get(list_units).post(create_unit))
        .route("/operational-units/:id/residents", get(list_residents))
        .route("/operational-units/:id/summary", get(unit_summary))
        .route("/residents", post(create_resident))
}

async fn list_units(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = DirectoryService::new(state);
    let units = service.list_units(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "units": units })))
}

async fn create_unit(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUnitRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = DirectoryService::new(state);
    let unit = service.create_unit(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "unit": unit })))
}

async fn list_residents(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = DirectoryService::new(state);
    let residents = service.list_residents(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "residents": residents })))
}

async fn unit_summary(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = DirectoryService::new(state);
    let summary = service.unit_summary(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}

async fn create_resident(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateResidentRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = DirectoryService::new(state);
    let resident = service
        .create_resident(&user, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "resident": resident })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
