use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, patch},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::errors::ServiceError,
    services::users::{CreateUserRequest, UpdateUserRequest, UserFilters, UserService},
};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", patch(update_user))
}

async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(filters): Query<UserFilters>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = UserService::new(state);
    let users = service.list(&user, filters).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "users": users })))
}

async fn create_user(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = UserService::new(state);
    let created = service.create(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "user": created })))
}

async fn update_user(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = UserService::new(state);
    let updated = service.update(&user, id, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "user": updated })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
