use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::models::{ExpenseSource, Role, UnitExpense},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExpenseRequest {
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(range(min = 1))]
    pub amount_cents: i64,
    pub source_type: ExpenseSource,
    pub expense_date: Option<NaiveDate>,
    pub pm_advance_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseFilters {
    pub unit_id: Option<Uuid>,
    pub source: Option<ExpenseSource>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDetail {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub unit_code: String,
    pub project_name: String,
    pub description: String,
    pub amount_cents: i64,
    pub source_type: ExpenseSource,
    pub expense_date: NaiveDate,
    pub recorded_by_name: String,
    pub created_at: DateTime<Utc>,
}

pub struct ExpenseService {
    pub state: Arc<AppState>,
}

impl ExpenseService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Lists operational expenses. Without a source filter only office-fund
    /// and advance-backed rows show; conversion expenses live on their
    /// invoices.
    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        filters: ExpenseFilters,
    ) -> Result<Vec<ExpenseDetail>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        sqlx::query_as::<_, ExpenseDetail>(
            "SELECT
                 e.id,
                 e.unit_id,
                 u.code AS unit_code,
                 p.name AS project_name,
                 e.description,
                 e.amount_cents,
                 e.source_type,
                 e.expense_date,
                 r.name AS recorded_by_name,
                 e.created_at
             FROM unit_expenses e
             JOIN operational_units u ON u.id = e.unit_id
             JOIN projects p ON p.id = u.project_id
             JOIN users r ON r.id = e.recorded_by_user_id
             WHERE ($1::uuid IS NULL OR e.unit_id = $1)
               AND (
                   ($2::expense_source IS NULL AND e.source_type IN ('office_fund', 'pm_advance'))
                   OR e.source_type = $2
               )
             ORDER BY e.expense_date DESC, e.created_at DESC",
        )
        .bind(filters.unit_id)
        .bind(filters.source)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Records an operational expense against a unit. An advance-backed
    /// expense draws on the advance in the same transaction; the advance must
    /// belong to the unit's project.
    pub async fn record(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateExpenseRequest,
    ) -> Result<UnitExpense, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let unit_project = sqlx::query_scalar::<_, Uuid>(
            "SELECT project_id FROM operational_units WHERE id = $1",
        )
        .bind(payload.unit_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let expense_date = payload.expense_date.unwrap_or_else(|| Utc::now().date_naive());

        match payload.source_type {
            ExpenseSource::OfficeFund => {
                self.insert_expense(&payload, expense_date, actor.user_id, None, &self.state.pool)
                    .await
            }
            ExpenseSource::PmAdvance => {
                let advance_id = payload.pm_advance_id.ok_or_else(|| {
                    ServiceError::Validation(
                        "pm_advance_id is required for advance-backed expenses".into(),
                    )
                })?;
                let mut tx = self
                    .state
                    .pool
                    .begin()
                    .await
                    .map_err(|err| ServiceError::Internal(err.to_string()))?;

                let advance_project = sqlx::query_scalar::<_, Uuid>(
                    "SELECT project_id FROM pm_advances WHERE id = $1 FOR UPDATE",
                )
                .bind(advance_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?
                .ok_or(ServiceError::NotFound)?;
                if advance_project != unit_project {
                    return Err(ServiceError::Validation(
                        "Advance belongs to a different project".into(),
                    ));
                }

                let expense = self
                    .insert_expense(
                        &payload,
                        expense_date,
                        actor.user_id,
                        Some(advance_id),
                        &mut *tx,
                    )
                    .await?;
                sqlx::query(
                    "UPDATE pm_advances SET remaining_cents = GREATEST(0, remaining_cents - $1) WHERE id = $2",
                )
                .bind(payload.amount_cents)
                .bind(advance_id)
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

                tx.commit()
                    .await
                    .map_err(|err| ServiceError::Internal(err.to_string()))?;
                Ok(expense)
            }
            ExpenseSource::Other => Err(ServiceError::Validation(
                "Operational expenses use the office fund or a PM advance".into(),
            )),
        }
    }

    async fn insert_expense<'e, E>(
        &self,
        payload: &CreateExpenseRequest,
        expense_date: NaiveDate,
        recorded_by: Uuid,
        pm_advance_id: Option<Uuid>,
        executor: E,
    ) -> Result<UnitExpense, ServiceError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query_as::<_, UnitExpense>(
            "INSERT INTO unit_expenses (id, unit_id, description, amount_cents, source_type, expense_date, recorded_by_user_id, pm_advance_id, claim_invoice_id, from_accounting_note_id, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,NULL,NULL,$9)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.unit_id)
        .bind(payload.description.trim())
        .bind(payload.amount_cents)
        .bind(payload.source_type)
        .bind(expense_date)
        .bind(recorded_by)
        .bind(pm_advance_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }
}
