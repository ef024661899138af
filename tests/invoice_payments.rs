use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension, Router,
};
use chrono::Utc;
use estate_portal::{api, infrastructure::auth::issue_token};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::{build_state, run_test, seed_directory, Seed};

#[tokio::test]
async fn partial_then_full_payment_settles_and_provisions_successor() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let invoice_id = insert_claim_invoice(&pool, &seed, 50_000).await?;

        let partial = request(
            &app,
            "PATCH",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay", "amount_cents": 20_000 })),
        )
        .await;
        assert_eq!(partial.0, StatusCode::OK);
        let invoice = &partial.1["invoice"];
        assert_eq!(invoice["totalPaidCents"], 20_000);
        assert_eq!(invoice["remainingCents"], 30_000);
        assert_eq!(invoice["isPaid"], false);

        let full = request(
            &app,
            "PATCH",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay", "amount_cents": 30_000 })),
        )
        .await;
        assert_eq!(full.0, StatusCode::OK);
        let invoice = &full.1["invoice"];
        assert_eq!(invoice["totalPaidCents"], 50_000);
        assert_eq!(invoice["remainingCents"], 0);
        assert_eq!(invoice["isPaid"], true);

        // Settling spawned the unit's next empty open claim invoice.
        let successor: (Uuid, i64, i64) = sqlx::query_as(
            "SELECT id, amount_cents, remaining_cents FROM invoices
             WHERE unit_id = $1 AND invoice_type = 'claim' AND NOT is_paid",
        )
        .bind(seed.unit_id)
        .fetch_one(&pool)
        .await?;
        assert_ne!(successor.0, invoice_id);
        assert_eq!(successor.1, 0);
        assert_eq!(successor.2, 0);

        assert_invoice_invariants(&pool, seed.unit_id).await?;

        Ok(())
    })
    .await
}

#[tokio::test]
async fn over_payment_is_rejected_without_mutation() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let invoice_id = insert_claim_invoice(&pool, &seed, 10_000).await?;

        let response = request(
            &app,
            "PATCH",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay", "amount_cents": 15_000 })),
        )
        .await;
        assert_eq!(response.0, StatusCode::BAD_REQUEST);

        let (total_paid, remaining, is_paid): (i64, i64, bool) = sqlx::query_as(
            "SELECT total_paid_cents, remaining_cents, is_paid FROM invoices WHERE id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(total_paid, 0);
        assert_eq!(remaining, 10_000);
        assert!(!is_paid);

        let unknown_action = request(
            &app,
            "PATCH",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "waive" })),
        )
        .await;
        assert_eq!(unknown_action.0, StatusCode::BAD_REQUEST);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn mark_paid_settles_the_remaining_balance() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let invoice_id = insert_claim_invoice(&pool, &seed, 42_500).await?;

        let response = request(
            &app,
            "PATCH",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "mark-paid" })),
        )
        .await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1["invoice"]["isPaid"], true);
        assert_eq!(response.1["invoice"]["remainingCents"], 0);
        assert_eq!(response.1["invoice"]["totalPaidCents"], 42_500);

        assert_invoice_invariants(&pool, seed.unit_id).await?;

        Ok(())
    })
    .await
}

#[tokio::test]
async fn invoice_detail_carries_expense_line_items() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let invoice_id = insert_claim_invoice(&pool, &seed, 12_000).await?;
        let expense_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO unit_expenses (id, unit_id, description, amount_cents, source_type, expense_date, recorded_by_user_id, claim_invoice_id, created_at)
             VALUES ($1,$2,'Claimed work',12000,'other',$3,$4,$5,$6)",
        )
        .bind(expense_id)
        .bind(seed.unit_id)
        .bind(Utc::now().date_naive())
        .bind(seed.accountant.id)
        .bind(invoice_id)
        .bind(Utc::now())
        .execute(&pool)
        .await?;

        let detail = request(
            &app,
            "GET",
            &format!("/api/invoices/{invoice_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(detail.0, StatusCode::OK);
        let expenses = detail.1["invoice"]["expenses"].as_array().unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0]["id"], serde_json::json!(expense_id));
        assert_eq!(expenses[0]["amount_cents"], 12_000);

        Ok(())
    })
    .await
}

/// Property check: `remaining == amount - total_paid` and
/// `is_paid == (remaining <= 0)` for every invoice of the unit.
async fn assert_invoice_invariants(pool: &PgPool, unit_id: Uuid) -> Result<()> {
    let rows: Vec<(i64, i64, i64, bool)> = sqlx::query_as(
        "SELECT amount_cents, total_paid_cents, remaining_cents, is_paid FROM invoices WHERE unit_id = $1",
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await?;
    for (amount, total_paid, remaining, is_paid) in rows {
        assert_eq!(remaining, amount - total_paid);
        assert_eq!(is_paid, remaining <= 0);
    }

    let open_claims: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM invoices WHERE unit_id = $1 AND invoice_type = 'claim' AND NOT is_paid",
    )
    .bind(unit_id)
    .fetch_one(pool)
    .await?;
    assert!(open_claims <= 1);
    Ok(())
}

async fn insert_claim_invoice(pool: &PgPool, seed: &Seed, amount_cents: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO invoices (id, invoice_number, invoice_type, unit_id, owner_association_id, amount_cents, total_paid_cents, remaining_cents, is_paid, issued_at)
         VALUES ($1,$2,'claim',$3,$4,$5,0,$5,FALSE,$6)",
    )
    .bind(id)
    .bind(format!("INV-IT-{}", &id.simple().to_string()[..10]))
    .bind(seed.unit_id)
    .bind(seed.association_id)
    .bind(amount_cents)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(id)
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("failed to build request");

    let response = app.clone().oneshot(request).await.expect("service error");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
