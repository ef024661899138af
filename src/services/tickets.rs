use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        models::{Role, Ticket, TicketPriority, TicketStatus},
        phone, policy,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    pub unit_id: Uuid,
    #[validate(length(min = 1))]
    pub resident_phone: String,
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    pub title: Option<String>,
    pub priority: Option<TicketPriority>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_to_user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFilters {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub project_id: Option<Uuid>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetail {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub unit_code: String,
    pub project_id: Uuid,
    pub project_name: String,
    pub resident_id: Uuid,
    pub resident_name: String,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_to_user_id: Option<Uuid>,
    pub assigned_to_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TicketService {
    pub state: Arc<AppState>,
}

impl TicketService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Lists tickets with optional status/priority filters. Project managers
    /// only see their projects; the explicit project filter is admin-only.
    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        filters: TicketFilters,
    ) -> Result<Vec<TicketDetail>, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        if filters.project_id.is_some() && actor.role != Role::Admin {
            return Err(ServiceError::Forbidden);
        }
        let unrestricted =
            matches!(actor.role, Role::Admin | Role::Accountant) || actor.can_view_all_projects;
        sqlx::query_as::<_, TicketDetail>(&format!(
            "{TICKET_DETAIL_QUERY}
             WHERE ($1::ticket_status IS NULL OR t.status = $1)
               AND ($2::ticket_priority IS NULL OR t.priority = $2)
               AND ($3::uuid IS NULL OR u.project_id = $3)
               AND ($4 OR u.project_id = ANY($5))
             ORDER BY t.created_at DESC, t.id DESC"
        ))
        .bind(filters.status)
        .bind(filters.priority)
        .bind(filters.project_id)
        .bind(unrestricted)
        .bind(&actor.project_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Opens a ticket from the dashboard. The resident is resolved by phone
    /// within the unit; the title defaults to the first hundred characters of
    /// the complaint.
    pub async fn create(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateTicketRequest,
    ) -> Result<Ticket, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
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
        if !actor.can_access_project(unit_project) {
            return Err(ServiceError::Forbidden);
        }

        let variants = phone::phone_variants(&payload.resident_phone);
        let resident_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM residents WHERE unit_id = $1 AND (phone = ANY($2) OR whatsapp_phone = ANY($2))
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(payload.unit_id)
        .bind(&variants)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let title = match payload.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => policy::ticket_title(title),
            _ => policy::ticket_title(payload.description.trim()),
        };
        self.insert(
            payload.unit_id,
            resident_id,
            &title,
            payload.description.trim(),
            payload.priority.unwrap_or(TicketPriority::Normal),
        )
        .await
    }

    pub async fn update(
        &self,
        actor: &AuthenticatedUser,
        ticket_id: Uuid,
        payload: UpdateTicketRequest,
    ) -> Result<Ticket, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;

        let project_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT u.project_id FROM tickets t JOIN operational_units u ON u.id = t.unit_id WHERE t.id = $1",
        )
        .bind(ticket_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;
        if !actor.can_access_project(project_id) {
            return Err(ServiceError::Forbidden);
        }

        if let Some(assignee) = payload.assigned_to_user_id {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM users WHERE id = $1")
                .bind(assignee)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
            if exists == 0 {
                return Err(ServiceError::Validation("Assignee does not exist".into()));
            }
        }

        sqlx::query_as::<_, Ticket>(
            "UPDATE tickets
             SET status = COALESCE($1, status),
                 priority = COALESCE($2, priority),
                 assigned_to_user_id = COALESCE($3, assigned_to_user_id),
                 updated_at = $4
             WHERE id = $5
             RETURNING *",
        )
        .bind(payload.status)
        .bind(payload.priority)
        .bind(payload.assigned_to_user_id)
        .bind(Utc::now())
        .bind(ticket_id)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Raw insert shared with the webhook adapters, which resolve the unit
    /// and resident themselves.
    pub(crate) async fn insert(
        &self,
        unit_id: Uuid,
        resident_id: Uuid,
        title: &str,
        description: &str,
        priority: TicketPriority,
    ) -> Result<Ticket, ServiceError> {
        let now = Utc::now();
        sqlx::query_as::<_, Ticket>(
            "INSERT INTO tickets (id, unit_id, resident_id, title, description, status, priority, assigned_to_user_id, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,NULL,$8,$8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(unit_id)
        .bind(resident_id)
        .bind(title)
        .bind(description)
        .bind(TicketStatus::New)
        .bind(priority)
        .bind(now)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }
}

const TICKET_DETAIL_QUERY: &str = "
    SELECT
        t.id,
        t.unit_id,
        u.code AS unit_code,
        u.project_id,
        p.name AS project_name,
        t.resident_id,
        res.name AS resident_name,
        t.title,
        t.description,
        t.status,
        t.priority,
        t.assigned_to_user_id,
        assignee.name AS assigned_to_name,
        t.created_at,
        t.updated_at
    FROM tickets t
    JOIN operational_units u ON u.id = t.unit_id
    JOIN projects p ON p.id = u.project_id
    JOIN residents res ON res.id = t.resident_id
    LEFT JOIN users assignee ON assignee.id = t.assigned_to_user_id";
