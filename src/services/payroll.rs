//! Monthly payroll runs and staff advances. One run per month, built from
//! active staff with their pending advances deducted from gross; paying the
//! run settles exactly the advances it captured.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        models::{
            Payroll, PayrollItem, PayrollStatus, Role, StaffAdvance, StaffAdvanceStatus,
            StaffMember,
        },
        policy,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize)]
pub struct GeneratePayrollRequest {
    pub month: String,
}

#[derive(Debug, Deserialize)]
pub struct PayrollActionRequest {
    pub action: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStaffRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 0))]
    pub salary_cents: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStaffAdvanceRequest {
    #[validate(range(min = 1))]
    pub amount_cents: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollDetail {
    #[serde(flatten)]
    pub payroll: Payroll,
    pub items: Vec<PayrollItem>,
}

pub struct PayrollService {
    pub state: Arc<AppState>,
}

impl PayrollService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn list(&self, actor: &AuthenticatedUser) -> Result<Vec<PayrollDetail>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let payrolls = sqlx::query_as::<_, Payroll>(
            "SELECT * FROM payrolls ORDER BY month DESC, created_at DESC",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let payroll_ids: Vec<Uuid> = payrolls.iter().map(|payroll| payroll.id).collect();
        let items: Vec<PayrollItem> = sqlx::query_as(
            "SELECT * FROM payroll_items WHERE payroll_id = ANY($1) ORDER BY staff_name ASC",
        )
        .bind(&payroll_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut by_payroll: HashMap<Uuid, Vec<PayrollItem>> = HashMap::new();
        for item in items {
            by_payroll.entry(item.payroll_id).or_default().push(item);
        }

        Ok(payrolls
            .into_iter()
            .map(|payroll| {
                let items = by_payroll.remove(&payroll.id).unwrap_or_default();
                PayrollDetail { payroll, items }
            })
            .collect())
    }

    /// Generates one month's payroll from active staff, deducting each
    /// member's Pending advances from gross. One run per month; a repeat is
    /// `Conflict`. The run and its items commit together.
    pub async fn generate(
        &self,
        actor: &AuthenticatedUser,
        payload: GeneratePayrollRequest,
    ) -> Result<PayrollDetail, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let month = payload.month.trim();
        if !policy::month_key_is_valid(month) {
            return Err(ServiceError::Validation(
                "Month must be formatted as YYYY-MM".into(),
            ));
        }

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM payrolls WHERE month = $1")
            .bind(month)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if taken > 0 {
            return Err(ServiceError::Conflict);
        }

        let staff: Vec<StaffPayRow> = sqlx::query_as(
            "SELECT
                 s.id,
                 s.name,
                 s.salary_cents,
                 COALESCE((SELECT SUM(a.amount_cents) FROM staff_advances a
                           WHERE a.staff_member_id = s.id AND a.status = 'pending'), 0)::BIGINT AS advances_cents
             FROM staff_members s
             WHERE s.active
             ORDER BY s.name ASC",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if staff.is_empty() {
            return Err(ServiceError::Validation(
                "No active staff to run payroll for".into(),
            ));
        }

        let total_gross: i64 = staff.iter().map(|row| row.salary_cents).sum();
        let total_advances: i64 = staff.iter().map(|row| row.advances_cents).sum();
        let payroll = sqlx::query_as::<_, Payroll>(
            "INSERT INTO payrolls (id, month, total_gross_cents, total_advances_cents, total_net_cents, status, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(month)
        .bind(total_gross)
        .bind(total_advances)
        .bind(total_gross - total_advances)
        .bind(PayrollStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(super::directory::map_unique_violation)?;

        let mut items = Vec::with_capacity(staff.len());
        for row in staff {
            let item = sqlx::query_as::<_, PayrollItem>(
                "INSERT INTO payroll_items (id, payroll_id, staff_member_id, staff_name, salary_cents, advances_cents, net_cents)
                 VALUES ($1,$2,$3,$4,$5,$6,$7)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(payroll.id)
            .bind(row.id)
            .bind(&row.name)
            .bind(row.salary_cents)
            .bind(row.advances_cents)
            .bind(row.salary_cents - row.advances_cents)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
            items.push(item);
        }

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(PayrollDetail { payroll, items })
    }

    /// Marks a payroll Paid and flips the staff advances it deducted to
    /// Deducted, in one transaction. Paying a paid run is `Conflict`.
    pub async fn apply_action(
        &self,
        actor: &AuthenticatedUser,
        payroll_id: Uuid,
        payload: PayrollActionRequest,
    ) -> Result<PayrollDetail, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        if payload.action != "pay" {
            return Err(ServiceError::Validation(format!(
                "Unsupported action: {}",
                payload.action
            )));
        }

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let payroll =
            sqlx::query_as::<_, Payroll>("SELECT * FROM payrolls WHERE id = $1 FOR UPDATE")
                .bind(payroll_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?
                .ok_or(ServiceError::NotFound)?;
        if payroll.status != PayrollStatus::Pending {
            return Err(ServiceError::Conflict);
        }

        let payroll = sqlx::query_as::<_, Payroll>(
            "UPDATE payrolls SET status = $1, paid_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(PayrollStatus::Paid)
        .bind(Utc::now())
        .bind(payroll.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        // Only advances that existed when the run was generated were captured
        // into its items; anything granted later belongs to the next run.
        sqlx::query(
            "UPDATE staff_advances SET status = 'deducted'
             WHERE status = 'pending'
               AND granted_at <= $2
               AND staff_member_id IN (SELECT staff_member_id FROM payroll_items WHERE payroll_id = $1)",
        )
        .bind(payroll.id)
        .bind(payroll.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let items: Vec<PayrollItem> = sqlx::query_as(
            "SELECT * FROM payroll_items WHERE payroll_id = $1 ORDER BY staff_name ASC",
        )
        .bind(payroll.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(PayrollDetail { payroll, items })
    }

    pub async fn list_staff(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<StaffMember>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        sqlx::query_as::<_, StaffMember>("SELECT * FROM staff_members ORDER BY name ASC, id ASC")
            .fetch_all(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn create_staff(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateStaffRequest,
    ) -> Result<StaffMember, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        sqlx::query_as::<_, StaffMember>(
            "INSERT INTO staff_members (id, name, salary_cents, active, created_at)
             VALUES ($1,$2,$3,TRUE,$4)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.name.trim())
        .bind(payload.salary_cents)
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn grant_staff_advance(
        &self,
        actor: &AuthenticatedUser,
        staff_member_id: Uuid,
        payload: CreateStaffAdvanceRequest,
    ) -> Result<StaffAdvance, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM staff_members WHERE id = $1")
                .bind(staff_member_id)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if exists == 0 {
            return Err(ServiceError::NotFound);
        }

        sqlx::query_as::<_, StaffAdvance>(
            "INSERT INTO staff_advances (id, staff_member_id, amount_cents, status, granted_at)
             VALUES ($1,$2,$3,$4,$5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(staff_member_id)
        .bind(payload.amount_cents)
        .bind(StaffAdvanceStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// A staff advance can be deleted only while Pending; once a payroll has
    /// deducted it the row is history.
    pub async fn delete_staff_advance(
        &self,
        actor: &AuthenticatedUser,
        advance_id: Uuid,
    ) -> Result<(), ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let result = sqlx::query("DELETE FROM staff_advances WHERE id = $1 AND status = 'pending'")
            .bind(advance_id)
            .execute(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM staff_advances WHERE id = $1")
            .bind(advance_id)
            .fetch_one(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if exists == 0 {
            Err(ServiceError::NotFound)
        } else {
            Err(ServiceError::Conflict)
        }
    }
}

#[derive(FromRow)]
struct StaffPayRow {
    id: Uuid,
    name: String,
    salary_cents: i64,
    advances_cents: i64,
}
