use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    domain::models::NoteStatus,
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::errors::ServiceError,
    services::notes::{ConvertToExpenseRequest, CreateNoteRequest, DecideNoteRequest, NoteService},
};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_notes).post(create_note))
        .route(
            "/:id",
            get(get_note).patch(decide_note).delete(delete_note),
        )
        .route("/:id/convert-to-expense", post(convert_to_expense))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<NoteStatus>,
}

async fn list_notes(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    let notes = service.list(&user, query.status).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "notes": notes })))
}

async fn create_note(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateNoteRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    let note = service.create(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "note": note })))
}

async fn get_note(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    let note = service.get(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "note": note })))
}

async fn decide_note(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecideNoteRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    let outcome = service.decide(&user, id, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "result": outcome })))
}

async fn convert_to_expense(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConvertToExpenseRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    let conversion = service
        .convert_to_expense(&user, id, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "result": conversion })))
}

async fn delete_note(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = NoteService::new(state);
    service.delete(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
