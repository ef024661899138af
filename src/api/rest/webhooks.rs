//! Webhook endpoints. These take the raw body so the HMAC signature can be
//! verified over exactly the bytes that were sent.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use bytes::Bytes;

use crate::{
    infrastructure::{
        signature::{API_KEY_HEADER, SIGNATURE_HEADER},
        state::AppState,
    },
    services::errors::ServiceError,
    services::webhooks::WebhookService,
};

pub fn router() -> Router {
    Router::new()
        .route("/accounting-note", post(accounting_note))
        .route("/ticket", post(ticket))
        .route("/delivery-order", post(delivery_order))
        .route("/tickets", post(keyed_ticket))
}

async fn accounting_note(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = WebhookService::new(state);
    let response = service
        .ingest_accounting_note(header_value(&headers, SIGNATURE_HEADER), &body)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!(response)))
}

async fn ticket(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = WebhookService::new(state);
    let response = service
        .ingest_ticket(header_value(&headers, SIGNATURE_HEADER), &body)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!(response)))
}

async fn delivery_order(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = WebhookService::new(state);
    let response = service
        .ingest_delivery_order(header_value(&headers, SIGNATURE_HEADER), &body)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!(response)))
}

async fn keyed_ticket(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = WebhookService::new(state);
    let response = service
        .ingest_keyed_ticket(header_value(&headers, API_KEY_HEADER), &body)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!(response)))
}

fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
