//! Units and residents, plus the per-unit summary panel the dashboard shows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::try_join;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::models::{OperationalUnit, Resident, Role},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUnitRequest {
    pub project_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateResidentRequest {
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_phone: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UnitDetail {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub code: String,
    pub name: Option<String>,
    pub resident_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UnitFinancials {
    pub total_expenses_cents: i64,
    pub outstanding_invoice_cents: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummary {
    pub unit: OperationalUnit,
    pub project_name: String,
    pub open_tickets: i64,
    pub open_orders: i64,
    pub total_expenses_cents: i64,
    pub outstanding_invoice_cents: i64,
}

pub struct DirectoryService {
    pub state: Arc<AppState>,
}

impl DirectoryService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Lists units, scoped to the caller's projects for project managers.
    pub async fn list_units(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<UnitDetail>, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let unrestricted =
            matches!(actor.role, Role::Admin | Role::Accountant) || actor.can_view_all_projects;
        sqlx::query_as::<_, UnitDetail>(
            "SELECT
                 u.id,
                 u.project_id,
                 p.name AS project_name,
                 u.code,
                 u.name,
                 (SELECT COUNT(1) FROM residents r WHERE r.unit_id = u.id) AS resident_count,
                 u.created_at
             FROM operational_units u
             JOIN projects p ON p.id = u.project_id
             WHERE ($1 OR u.project_id = ANY($2))
             ORDER BY p.name ASC, u.code ASC",
        )
        .bind(unrestricted)
        .bind(&actor.project_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Registers a unit under a project. Unit codes are unique per project;
    /// a duplicate surfaces as `Conflict`.
    pub async fn create_unit(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateUnitRequest,
    ) -> Result<OperationalUnit, ServiceError> {
        ensure_role(actor, &[Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let project_exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM projects WHERE id = $1")
                .bind(payload.project_id)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if project_exists == 0 {
            return Err(ServiceError::NotFound);
        }

        sqlx::query_as::<_, OperationalUnit>(
            "INSERT INTO operational_units (id, project_id, code, name, created_at)
             VALUES ($1,$2,$3,$4,$5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.project_id)
        .bind(payload.code.trim())
        .bind(payload.name.as_deref().map(str::trim))
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(map_unique_violation)
    }

    pub async fn list_residents(
        &self,
        actor: &AuthenticatedUser,
        unit_id: Uuid,
    ) -> Result<Vec<Resident>, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let project_id = self.unit_project(unit_id).await?;
        if !actor.can_access_project(project_id) {
            return Err(ServiceError::Forbidden);
        }
        sqlx::query_as::<_, Resident>(
            "SELECT * FROM residents WHERE unit_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(unit_id)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn create_resident(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateResidentRequest,
    ) -> Result<Resident, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        let project_id = self.unit_project(payload.unit_id).await?;
        if !actor.can_access_project(project_id) {
            return Err(ServiceError::Forbidden);
        }

        sqlx::query_as::<_, Resident>(
            "INSERT INTO residents (id, unit_id, name, email, phone, whatsapp_phone, status, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,'ACTIVE',$7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.unit_id)
        .bind(payload.name.trim())
        .bind(payload.email.as_deref().map(str::trim))
        .bind(payload.phone.as_deref().map(str::trim))
        .bind(payload.whatsapp_phone.as_deref().map(str::trim))
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Unit header plus operational and financial aggregates. The aggregate
    /// queries are independent, so they run concurrently.
    pub async fn unit_summary(
        &self,
        actor: &AuthenticatedUser,
        unit_id: Uuid,
    ) -> Result<UnitSummary, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let unit = sqlx::query_as::<_, OperationalUnit>(
            "SELECT * FROM operational_units WHERE id = $1",
        )
        .bind(unit_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;
        if !actor.can_access_project(unit.project_id) {
            return Err(ServiceError::Forbidden);
        }

        let project_name = sqlx::query_scalar::<_, String>("SELECT name FROM projects WHERE id = $1")
            .bind(unit.project_id)
            .fetch_one(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let open_tickets = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM tickets WHERE unit_id = $1 AND status IN ('new', 'in_progress')",
        )
        .bind(unit_id)
        .fetch_one(&self.state.pool);
        let open_orders = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM delivery_orders WHERE unit_id = $1 AND status IN ('new', 'in_progress')",
        )
        .bind(unit_id)
        .fetch_one(&self.state.pool);
        let financials = sqlx::query_as::<_, UnitFinancials>(
            "SELECT
                 COALESCE((SELECT SUM(amount_cents) FROM unit_expenses WHERE unit_id = $1), 0) AS total_expenses_cents,
                 COALESCE((SELECT SUM(remaining_cents) FROM invoices WHERE unit_id = $1 AND NOT is_paid), 0) AS outstanding_invoice_cents",
        )
        .bind(unit_id)
        .fetch_one(&self.state.pool);

        let (open_tickets, open_orders, financials) =
            try_join!(open_tickets, open_orders, financials)
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(UnitSummary {
            unit,
            project_name,
            open_tickets,
            open_orders,
            total_expenses_cents: financials.total_expenses_cents,
            outstanding_invoice_cents: financials.outstanding_invoice_cents,
        })
    }

    async fn unit_project(&self, unit_id: Uuid) -> Result<Uuid, ServiceError> {
        sqlx::query_scalar::<_, Uuid>("SELECT project_id FROM operational_units WHERE id = $1")
            .bind(unit_id)
            .fetch_optional(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?
            .ok_or(ServiceError::NotFound)
    }
}

pub(crate) fn map_unique_violation(err: sqlx::Error) -> ServiceError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => ServiceError::Conflict,
        _ => ServiceError::Internal(err.to_string()),
    }
}
