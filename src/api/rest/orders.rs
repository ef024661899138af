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
    services::orders::{OrderFilters, OrderService, UpdateOrderRequest},
};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", patch(update_order))
}

async fn list_orders(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(filters): Query<OrderFilters>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = OrderService::new(state);
    let orders = service.list(&user, filters).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "orders": orders })))
}

async fn update_order(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = OrderService::new(state);
    let order = service.update(&user, id, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "order": order })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
