//! Payroll runs and staff records. Merged at the `/api` level because the
//! resource spans `/payroll` and `/staff`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, patch, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::errors::ServiceError,
    services::payroll::{
        CreateStaffAdvanceRequest, CreateStaffRequest, GeneratePayrollRequest,
        PayrollActionRequest, PayrollService,
    },
};

pub fn router() -> Router {
    Router::new()
        .route("/payroll", get(list_payrolls).post(generate_payroll))
        .route("/payroll/:id", patch(apply_payroll_action))
        .route("/staff", get(list_staff).post(create_staff))
        .route("/staff/:id/advances", post(grant_staff_advance))
        .route("/staff/advances/:id", delete(delete_staff_advance))
}

async fn list_payrolls(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let payrolls = service.list(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "payrolls": payrolls })))
}

async fn generate_payroll(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<GeneratePayrollRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let payroll = service.generate(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "payroll": payroll })))
}

async fn apply_payroll_action(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayrollActionRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let payroll = service
        .apply_action(&user, id, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "payroll": payroll })))
}

async fn list_staff(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let staff = service.list_staff(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "staff": staff })))
}

async fn create_staff(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateStaffRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let member = service.create_staff(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "staffMember": member })))
}

async fn grant_staff_advance(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateStaffAdvanceRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    let advance = service
        .grant_staff_advance(&user, id, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "advance": advance })))
}

async fn delete_staff_advance(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = PayrollService::new(state);
    service
        .delete_staff_advance(&user, id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
