//! Payroll runs touch every active staff member, so these scenarios are
//! serialized and retire leftover staff before seeding their own.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension, Router,
};
use estate_portal::{api, infrastructure::auth::issue_token};
use serde_json::Value;
use serial_test::serial;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::{build_state, run_test, seed_directory};

#[tokio::test]
#[serial]
async fn generating_deducts_pending_advances_and_refuses_a_repeat() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        retire_all_staff(&pool).await?;
        let guard_id = create_staff(&app, &token, "Guard", 500_000).await?;
        create_staff(&app, &token, "Janitor", 300_000).await?;

        let advance = request(
            &app,
            "POST",
            &format!("/api/staff/{guard_id}/advances"),
            Some(&token),
            Some(serde_json::json!({ "amount_cents": 50_000 })),
        )
        .await;
        assert_eq!(advance.0, StatusCode::OK);
        assert_eq!(advance.1["advance"]["status"], "PENDING");

        let month = random_month();
        let generated = request(
            &app,
            "POST",
            "/api/payroll",
            Some(&token),
            Some(serde_json::json!({ "month": month })),
        )
        .await;
        assert_eq!(generated.0, StatusCode::OK);
        let payroll = &generated.1["payroll"];
        assert_eq!(payroll["month"], month);
        assert_eq!(payroll["status"], "PENDING");
        assert_eq!(payroll["total_gross_cents"], 800_000);
        assert_eq!(payroll["total_advances_cents"], 50_000);
        assert_eq!(payroll["total_net_cents"], 750_000);

        let items = payroll["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["staff_name"], "Guard");
        assert_eq!(items[0]["net_cents"], 450_000);
        assert_eq!(items[1]["staff_name"], "Janitor");
        assert_eq!(items[1]["net_cents"], 300_000);

        let repeat = request(
            &app,
            "POST",
            "/api/payroll",
            Some(&token),
            Some(serde_json::json!({ "month": month })),
        )
        .await;
        assert_eq!(repeat.0, StatusCode::CONFLICT);

        let malformed = request(
            &app,
            "POST",
            "/api/payroll",
            Some(&token),
            Some(serde_json::json!({ "month": "2026-13" })),
        )
        .await;
        assert_eq!(malformed.0, StatusCode::BAD_REQUEST);

        Ok(())
    })
    .await
}

#[tokio::test]
#[serial]
async fn paying_flips_advances_to_deducted_exactly_once() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        retire_all_staff(&pool).await?;
        let staff_id = create_staff(&app, &token, "Supervisor", 700_000).await?;
        let advance = request(
            &app,
            "POST",
            &format!("/api/staff/{staff_id}/advances"),
            Some(&token),
            Some(serde_json::json!({ "amount_cents": 100_000 })),
        )
        .await;
        let advance_id = advance.1["advance"]["id"].as_str().unwrap().to_string();

        let generated = request(
            &app,
            "POST",
            "/api/payroll",
            Some(&token),
            Some(serde_json::json!({ "month": random_month() })),
        )
        .await;
        assert_eq!(generated.0, StatusCode::OK);
        let payroll_id = generated.1["payroll"]["id"].as_str().unwrap().to_string();

        let paid = request(
            &app,
            "PATCH",
            &format!("/api/payroll/{payroll_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay" })),
        )
        .await;
        assert_eq!(paid.0, StatusCode::OK);
        assert_eq!(paid.1["payroll"]["status"], "PAID");
        assert!(paid.1["payroll"]["paid_at"].is_string());

        let status: String =
            sqlx::query_scalar("SELECT status::text FROM staff_advances WHERE id = $1")
                .bind(Uuid::parse_str(&advance_id)?)
                .fetch_one(&pool)
                .await?;
        assert_eq!(status, "deducted");

        let again = request(
            &app,
            "PATCH",
            &format!("/api/payroll/{payroll_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay" })),
        )
        .await;
        assert_eq!(again.0, StatusCode::CONFLICT);

        // Deducted advances are history and survive a delete attempt.
        let delete = request(
            &app,
            "DELETE",
            &format!("/api/staff/advances/{advance_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(delete.0, StatusCode::CONFLICT);

        Ok(())
    })
    .await
}

#[tokio::test]
#[serial]
async fn advances_granted_after_generation_survive_the_pay() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        retire_all_staff(&pool).await?;
        let staff_id = create_staff(&app, &token, "Electrician", 600_000).await?;

        let generated = request(
            &app,
            "POST",
            "/api/payroll",
            Some(&token),
            Some(serde_json::json!({ "month": random_month() })),
        )
        .await;
        assert_eq!(generated.0, StatusCode::OK);
        let payroll_id = generated.1["payroll"]["id"].as_str().unwrap().to_string();

        // Granted after the run was built, so no item deducted it.
        let late = request(
            &app,
            "POST",
            &format!("/api/staff/{staff_id}/advances"),
            Some(&token),
            Some(serde_json::json!({ "amount_cents": 40_000 })),
        )
        .await;
        assert_eq!(late.0, StatusCode::OK);
        let late_id = late.1["advance"]["id"].as_str().unwrap().to_string();

        let paid = request(
            &app,
            "PATCH",
            &format!("/api/payroll/{payroll_id}"),
            Some(&token),
            Some(serde_json::json!({ "action": "pay" })),
        )
        .await;
        assert_eq!(paid.0, StatusCode::OK);

        let status: String =
            sqlx::query_scalar("SELECT status::text FROM staff_advances WHERE id = $1")
                .bind(Uuid::parse_str(&late_id)?)
                .fetch_one(&pool)
                .await?;
        assert_eq!(status, "pending");

        let deleted = request(
            &app,
            "DELETE",
            &format!("/api/staff/advances/{late_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(deleted.0, StatusCode::OK);

        Ok(())
    })
    .await
}

#[tokio::test]
#[serial]
async fn pending_advances_can_be_deleted() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.accountant).unwrap();

        let staff_id = create_staff(&app, &token, "Receptionist", 400_000).await?;
        let advance = request(
            &app,
            "POST",
            &format!("/api/staff/{staff_id}/advances"),
            Some(&token),
            Some(serde_json::json!({ "amount_cents": 25_000 })),
        )
        .await;
        let advance_id = advance.1["advance"]["id"].as_str().unwrap().to_string();

        let deleted = request(
            &app,
            "DELETE",
            &format!("/api/staff/advances/{advance_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(deleted.0, StatusCode::OK);
        assert_eq!(deleted.1["deleted"], true);

        let missing = request(
            &app,
            "DELETE",
            &format!("/api/staff/advances/{advance_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(missing.0, StatusCode::NOT_FOUND);

        Ok(())
    })
    .await
}

#[tokio::test]
#[serial]
async fn project_managers_cannot_reach_payroll() -> Result<()> {
    run_test(|pool| async move {
        let state = build_state(&pool);
        let app = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
        let seed = seed_directory(&pool).await?;
        let token = issue_token(&state, &seed.manager).unwrap();

        let listing = request(&app, "GET", "/api/payroll", Some(&token), None).await;
        assert_eq!(listing.0, StatusCode::FORBIDDEN);

        let staff = request(&app, "GET", "/api/staff", Some(&token), None).await;
        assert_eq!(staff.0, StatusCode::FORBIDDEN);

        Ok(())
    })
    .await
}

/// Months are unique forever in the database, so each run picks from a range
/// no other scenario uses.
fn random_month() -> String {
    let entropy = Uuid::new_v4().as_u128();
    format!("{:04}-{:02}", 3000 + (entropy % 6000), 1 + (entropy >> 64) % 12)
}

async fn retire_all_staff(pool: &PgPool) -> Result<()> {
    sqlx::query("UPDATE staff_members SET active = FALSE")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_staff(app: &Router, token: &str, name: &str, salary_cents: i64) -> Result<Uuid> {
    let response = request(
        app,
        "POST",
        "/api/staff",
        Some(token),
        Some(serde_json::json!({ "name": name, "salary_cents": salary_cents })),
    )
    .await;
    assert_eq!(response.0, StatusCode::OK);
    Ok(Uuid::parse_str(
        response.1["staffMember"]["id"].as_str().unwrap(),
    )?)
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
