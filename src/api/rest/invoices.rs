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
    services::invoices::{InvoiceFilters, InvoiceService, PaymentRequest},
};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices))
        .route("/:id", get(get_invoice).patch(apply_payment))
}

async fn list_invoices(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(filters): Query<InvoiceFilters>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = InvoiceService::new(state);
    let invoices = service.list(&user, filters).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoices": invoices })))
}

async fn get_invoice(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = InvoiceService::new(state);
    let invoice = service.get(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

async fn apply_payment(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = InvoiceService::new(state);
    let invoice = service
        .apply_payment(&user, id, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
