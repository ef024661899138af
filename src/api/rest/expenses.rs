use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::errors::ServiceError,
    services::expenses::{CreateExpenseRequest, ExpenseFilters, ExpenseService},
};

pub fn router() -> Router {
    Router::new().route("/", get(list_expenses).post(record_expense))
}

async fn list_expenses(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(filters): Query<ExpenseFilters>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = ExpenseService::new(state);
    let expenses = service.list(&user, filters).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "expenses": expenses })))
}

async fn record_expense(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateExpenseRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = ExpenseService::new(state);
    let expense = service.record(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "expense": expense })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
