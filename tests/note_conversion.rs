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

use test_harness::{build_state, run_test, seed_directory};

#[tokio::test]
async fn converting_via_advance_books_expense_and_draws_float() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let accountant_token = issue_token(&state, &seed.accountant).unwrap();
        let manager_token = issue_token(&state, &seed.manager).unwrap();

        let advance_id = insert_advance(&pool, seed.manager.id, seed.project_id, 100_000).await?;

        let create = request(
            &app,
            "POST",
            "/api/accounting-notes",
            Some(&manager_token),
            Some(serde_json::json!({
                "project_id": seed.project_id,
                "unit_id": seed.unit_id,
                "description": "Pump replacement",
                "amount_cents": 30_000
            })),
        )
        .await;
        assert_eq!(create.0, StatusCode::OK);
        let note_id = create.1["note"]["id"].as_str().unwrap().to_string();
        assert_eq!(create.1["note"]["status"], "PENDING");

        let convert = request(
            &app,
            "POST",
            &format!("/api/accounting-notes/{note_id}/convert-to-expense"),
            Some(&accountant_token),
            Some(serde_json::json!({ "pm_advance_id": advance_id })),
        )
        .await;
        assert_eq!(convert.0, StatusCode::OK);
        assert_eq!(convert.1["result"]["note"]["status"], "CONVERTED");
        assert_eq!(convert.1["result"]["expense"]["amount_cents"], 30_000);
        assert_eq!(convert.1["result"]["advance"]["remaining_cents"], 70_000);

        let remaining: i64 =
            sqlx::query_scalar("SELECT remaining_cents FROM pm_advances WHERE id = $1")
                .bind(advance_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(remaining, 70_000);

        // A decided note never converts or rejects again, and only one
        // expense may ever exist for it.
        let again = request(
            &app,
            "POST",
            &format!("/api/accounting-notes/{note_id}/convert-to-expense"),
            Some(&accountant_token),
            Some(serde_json::json!({ "pm_advance_id": advance_id })),
        )
        .await;
        assert_eq!(again.0, StatusCode::CONFLICT);

        let reject = request(
            &app,
            "PATCH",
            &format!("/api/accounting-notes/{note_id}"),
            Some(&accountant_token),
            Some(serde_json::json!({ "status": "REJECTED" })),
        )
        .await;
        assert_eq!(reject.0, StatusCode::CONFLICT);

        let expenses: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM unit_expenses WHERE from_accounting_note_id = $1",
        )
        .bind(Uuid::parse_str(&note_id)?)
        .fetch_one(&pool)
        .await?;
        assert_eq!(expenses, 1);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn concurrent_conversions_admit_exactly_one_winner() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let advance_id = insert_advance(&pool, seed.manager.id, seed.project_id, 100_000).await?;
        let note_id = insert_note(&pool, &seed, 30_000).await?;
        let uri = format!("/api/accounting-notes/{note_id}/convert-to-expense");
        let body = serde_json::json!({ "pm_advance_id": advance_id });

        let (first, second) = tokio::join!(
            request(&app, "POST", &uri, Some(&token), Some(body.clone())),
            request(&app, "POST", &uri, Some(&token), Some(body)),
        );

        let statuses = [first.0, second.0];
        assert!(statuses.contains(&StatusCode::OK), "statuses: {statuses:?}");
        assert!(
            statuses.contains(&StatusCode::CONFLICT),
            "statuses: {statuses:?}"
        );

        // The loser neither booked an expense nor drew the float twice.
        let expenses: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM unit_expenses WHERE from_accounting_note_id = $1",
        )
        .bind(note_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(expenses, 1);

        let remaining: i64 =
            sqlx::query_scalar("SELECT remaining_cents FROM pm_advances WHERE id = $1")
                .bind(advance_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(remaining, 70_000);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn converting_via_invoice_creates_the_open_claim_invoice() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let accountant_token = issue_token(&state, &seed.accountant).unwrap();
        let manager_token = issue_token(&state, &seed.manager).unwrap();

        let create = request(
            &app,
            "POST",
            "/api/accounting-notes",
            Some(&manager_token),
            Some(serde_json::json!({
                "project_id": seed.project_id,
                "unit_id": seed.unit_id,
                "description": "Lobby repainting",
                "amount_cents": 15_000
            })),
        )
        .await;
        assert_eq!(create.0, StatusCode::OK);
        let note_id = create.1["note"]["id"].as_str().unwrap().to_string();

        let decide = request(
            &app,
            "PATCH",
            &format!("/api/accounting-notes/{note_id}"),
            Some(&accountant_token),
            Some(serde_json::json!({ "status": "CONVERTED" })),
        )
        .await;
        assert_eq!(decide.0, StatusCode::OK);
        assert_eq!(decide.1["result"]["note"]["status"], "CONVERTED");

        let invoice = &decide.1["result"]["invoice"];
        assert_eq!(invoice["invoice_type"], "CLAIM");
        assert_eq!(invoice["amount_cents"], 15_000);
        assert_eq!(invoice["remaining_cents"], 15_000);
        assert_eq!(invoice["is_paid"], false);
        assert_eq!(
            decide.1["result"]["expense"]["claim_invoice_id"],
            invoice["id"]
        );

        let open_claims: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM invoices WHERE unit_id = $1 AND invoice_type = 'claim' AND NOT is_paid",
        )
        .bind(seed.unit_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(open_claims, 1);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn rejection_is_terminal_and_books_nothing() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let accountant_token = issue_token(&state, &seed.accountant).unwrap();

        let note_id = insert_note(&pool, &seed, 20_000).await?;

        let reject = request(
            &app,
            "PATCH",
            &format!("/api/accounting-notes/{note_id}"),
            Some(&accountant_token),
            Some(serde_json::json!({ "status": "REJECTED" })),
        )
        .await;
        assert_eq!(reject.0, StatusCode::OK);
        assert_eq!(reject.1["result"]["status"], "REJECTED");
        assert!(reject.1["result"]["decided_at"].is_string());

        let expenses: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM unit_expenses WHERE from_accounting_note_id = $1",
        )
        .bind(note_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(expenses, 0);

        let convert = request(
            &app,
            "PATCH",
            &format!("/api/accounting-notes/{note_id}"),
            Some(&accountant_token),
            Some(serde_json::json!({ "status": "CONVERTED" })),
        )
        .await;
        assert_eq!(convert.0, StatusCode::CONFLICT);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn only_admins_delete_and_only_pending_notes() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let admin_token = issue_token(&state, &seed.admin).unwrap();
        let accountant_token = issue_token(&state, &seed.accountant).unwrap();

        let pending = insert_note(&pool, &seed, 5_000).await?;
        let decided = insert_note(&pool, &seed, 6_000).await?;
        let reject = request(
            &app,
            "PATCH",
            &format!("/api/accounting-notes/{decided}"),
            Some(&accountant_token),
            Some(serde_json::json!({ "status": "REJECTED" })),
        )
        .await;
        assert_eq!(reject.0, StatusCode::OK);

        let forbidden = request(
            &app,
            "DELETE",
            &format!("/api/accounting-notes/{pending}"),
            Some(&accountant_token),
            None,
        )
        .await;
        assert_eq!(forbidden.0, StatusCode::FORBIDDEN);

        let deleted = request(
            &app,
            "DELETE",
            &format!("/api/accounting-notes/{pending}"),
            Some(&admin_token),
            None,
        )
        .await;
        assert_eq!(deleted.0, StatusCode::OK);

        let history = request(
            &app,
            "DELETE",
            &format!("/api/accounting-notes/{decided}"),
            Some(&admin_token),
            None,
        )
        .await;
        assert_eq!(history.0, StatusCode::CONFLICT);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn managers_only_see_their_own_projects() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let note_id = insert_note(&pool, &seed, 9_000).await?;

        let outsider = test_harness::insert_user(
            &pool,
            estate_portal::domain::models::Role::ProjectManager,
            None,
        )
        .await?;
        let outsider_token = issue_token(&state, &outsider).unwrap();

        let denied = request(
            &app,
            "GET",
            &format!("/api/accounting-notes/{note_id}"),
            Some(&outsider_token),
            None,
        )
        .await;
        assert_eq!(denied.0, StatusCode::FORBIDDEN);

        let listing = request(&app, "GET", "/api/accounting-notes", Some(&outsider_token), None).await;
        assert_eq!(listing.0, StatusCode::OK);
        let ids: Vec<&str> = listing.1["notes"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|note| note["id"].as_str())
            .collect();
        assert!(!ids.contains(&note_id.to_string().as_str()));

        Ok(())
    })
    .await
}

async fn insert_note(pool: &PgPool, seed: &test_harness::Seed, amount_cents: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO accounting_notes (id, project_id, unit_id, created_by_user_id, description, amount_cents, status, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,'pending',$7)",
    )
    .bind(id)
    .bind(seed.project_id)
    .bind(seed.unit_id)
    .bind(seed.manager.id)
    .bind("Seeded note")
    .bind(amount_cents)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(id)
}

async fn insert_advance(
    pool: &PgPool,
    user_id: Uuid,
    project_id: Uuid,
    amount_cents: i64,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO pm_advances (id, user_id, project_id, amount_cents, remaining_cents, created_at)
         VALUES ($1,$2,$3,$4,$4,$5)",
    )
    .bind(id)
    .bind(user_id)
    .bind(project_id)
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
