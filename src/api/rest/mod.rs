use axum::{routing::get, Router};

use crate::api::rest::{
    advances::router as advances_router, auth::router as auth_router,
    directory::router as directory_router, expenses::router as expenses_router,
    invoices::router as invoices_router, notes::router as notes_router,
    orders::router as orders_router, payroll::router as payroll_router,
    tickets::router as tickets_router, users::router as users_router,
    webhooks::router as webhooks_router,
};

pub mod advances;
pub mod auth;
pub mod directory;
pub mod expenses;
pub mod health;
pub mod invoices;
pub mod notes;
pub mod orders;
pub mod payroll;
pub mod tickets;
pub mod users;
pub mod webhooks;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .nest("/auth", auth_router())
        .nest("/accounting-notes", notes_router())
        .nest("/invoices", invoices_router())
        .nest("/pm-advances", advances_router())
        .nest("/operational-expenses", expenses_router())
        .nest("/tickets", tickets_router())
        .nest("/delivery-orders", orders_router())
        .nest("/users", users_router())
        .nest("/webhooks", webhooks_router())
        .merge(directory_router())
        .merge(payroll_router())
}
