use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::models::{Role, User},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{directory::map_unique_violation, ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub whatsapp_phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub can_view_all_projects: bool,
    #[serde(default)]
    pub project_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub whatsapp_phone: Option<String>,
    pub can_view_all_projects: Option<bool>,
    pub project_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilters {
    pub role: Option<Role>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub whatsapp_phone: Option<String>,
    pub role: Role,
    pub can_view_all_projects: bool,
    pub project_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub struct UserService {
    pub state: Arc<AppState>,
}

impl UserService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        filters: UserFilters,
    ) -> Result<Vec<UserDetail>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE ($1::user_role IS NULL OR role = $1)
             ORDER BY name ASC, id ASC",
        )
        .bind(filters.role)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let user_ids: Vec<Uuid> = users.iter().map(|user| user.id).collect();
        let assignments: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT user_id, project_id FROM project_assignments WHERE user_id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut by_user: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for assignment in assignments {
            by_user
                .entry(assignment.user_id)
                .or_default()
                .push(assignment.project_id);
        }

        Ok(users
            .into_iter()
            .map(|user| {
                let project_ids = by_user.remove(&user.id).unwrap_or_default();
                UserDetail {
                    id: user.id,
                    name: user.name,
                    email: user.email,
                    whatsapp_phone: user.whatsapp_phone,
                    role: user.role,
                    can_view_all_projects: user.can_view_all_projects,
                    project_ids,
                    created_at: user.created_at,
                }
            })
            .collect())
    }

    /// Adds a directory user with their project assignments. A duplicate
    /// email surfaces as `Conflict`.
    pub async fn create(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateUserRequest,
    ) -> Result<User, ServiceError> {
        ensure_role(actor, &[Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, whatsapp_phone, role, can_view_all_projects, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(payload.name.trim())
        .bind(payload.email.trim().to_ascii_lowercase())
        .bind(payload.whatsapp_phone.as_deref().map(str::trim))
        .bind(payload.role)
        .bind(payload.can_view_all_projects)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        replace_assignments(&mut tx, user.id, &payload.project_ids).await?;

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(user)
    }

    /// Updates contact and scoping fields. When `project_ids` is present the
    /// assignment set is replaced wholesale in the same transaction.
    pub async fn update(
        &self,
        actor: &AuthenticatedUser,
        user_id: Uuid,
        payload: UpdateUserRequest,
    ) -> Result<User, ServiceError> {
        ensure_role(actor, &[Role::Admin])?;

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let user = sqlx::query_as::<_, User>(
            "UPDATE users
             SET whatsapp_phone = COALESCE($1, whatsapp_phone),
                 can_view_all_projects = COALESCE($2, can_view_all_projects)
             WHERE id = $3
             RETURNING *",
        )
        .bind(payload.whatsapp_phone.as_deref().map(str::trim))
        .bind(payload.can_view_all_projects)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        if let Some(project_ids) = &payload.project_ids {
            replace_assignments(&mut tx, user.id, project_ids).await?;
        }

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(user)
    }
}

async fn replace_assignments(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    project_ids: &[Uuid],
) -> Result<(), ServiceError> {
    sqlx::query("DELETE FROM project_assignments WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
    for project_id in project_ids {
        sqlx::query(
            "INSERT INTO project_assignments (user_id, project_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(project_id)
        .execute(&mut **tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
    }
    Ok(())
}

#[derive(FromRow)]
struct AssignmentRow {
    user_id: Uuid,
    project_id: Uuid,
}
