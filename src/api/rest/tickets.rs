use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::errors::ServiceError,
    services::tickets::{CreateTicketRequest, TicketFilters, TicketService, UpdateTicketRequest},
};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_tickets).post(create_ticket))
        .route("/:id", axum::routing::patch(update_ticket))
}

async fn list_tickets(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(filters): Query<TicketFilters>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = TicketService::new(state);
    let tickets = service.list(&user, filters).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "tickets": tickets })))
}

async fn create_ticket(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = TicketService::new(state);
    let ticket = service.create(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "ticket": ticket })))
}

async fn update_ticket(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTicketRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = TicketService::new(state);
    let ticket = service.update(&user, id, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "ticket": ticket })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
