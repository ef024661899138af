use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::models::{PmAdvance, Role},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAdvanceRequest {
    pub user_id: Uuid,
    pub project_id: Uuid,
    #[validate(range(min = 1))]
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceDetail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub holder_name: String,
    pub project_id: Uuid,
    pub project_name: String,
    pub amount_cents: i64,
    pub remaining_cents: i64,
    pub created_at: DateTime<Utc>,
}

pub struct AdvanceService {
    pub state: Arc<AppState>,
}

impl AdvanceService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn list(&self, actor: &AuthenticatedUser) -> Result<Vec<AdvanceDetail>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        sqlx::query_as::<_, AdvanceDetail>(
            "SELECT
                 a.id,
                 a.user_id,
                 u.name AS holder_name,
                 a.project_id,
                 p.name AS project_name,
                 a.amount_cents,
                 a.remaining_cents,
                 a.created_at
             FROM pm_advances a
             JOIN users u ON u.id = a.user_id
             JOIN projects p ON p.id = a.project_id
             ORDER BY a.created_at DESC, a.id DESC",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Issues an advance to a project manager for one project. The holder
    /// must be a project manager with access to that project.
    pub async fn create(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateAdvanceRequest,
    ) -> Result<PmAdvance, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let holder = sqlx::query_as::<_, HolderRow>(
            "SELECT role, can_view_all_projects FROM users WHERE id = $1",
        )
        .bind(payload.user_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;
        if holder.role != Role::ProjectManager {
            return Err(ServiceError::Validation(
                "Advance holder must be a project manager".into(),
            ));
        }

        let project_exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM projects WHERE id = $1",
        )
        .bind(payload.project_id)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if project_exists == 0 {
            return Err(ServiceError::NotFound);
        }

        if !holder.can_view_all_projects {
            let assigned = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(1) FROM project_assignments WHERE user_id = $1 AND project_id = $2",
            )
            .bind(payload.user_id)
            .bind(payload.project_id)
            .fetch_one(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
            if assigned == 0 {
                return Err(ServiceError::Validation(
                    "Advance holder is not assigned to the project".into(),
                ));
            }
        }

        sqlx::query_as::<_, PmAdvance>(
            "INSERT INTO pm_advances (id, user_id, project_id, amount_cents, remaining_cents, created_at)
             VALUES ($1,$2,$3,$4,$4,$5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.user_id)
        .bind(payload.project_id)
        .bind(payload.amount_cents)
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }
}

#[derive(FromRow)]
struct HolderRow {
    role: Role,
    can_view_all_projects: bool,
}
