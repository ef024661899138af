use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    domain::models::{DeliveryOrder, OrderStatus, Role},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
    pub assigned_to_user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub unit_code: String,
    pub project_id: Uuid,
    pub project_name: String,
    pub resident_id: Uuid,
    pub resident_name: String,
    pub title: String,
    pub description: String,
    pub status: OrderStatus,
    pub assigned_to_user_id: Option<Uuid>,
    pub assigned_to_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct OrderService {
    pub state: Arc<AppState>,
}

impl OrderService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Lists delivery orders, newest first, with the same project scoping as
    /// tickets.
    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        filters: OrderFilters,
    ) -> Result<Vec<OrderDetail>, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let unrestricted =
            matches!(actor.role, Role::Admin | Role::Accountant) || actor.can_view_all_projects;
        sqlx::query_as::<_, OrderDetail>(&format!(
            "{ORDER_DETAIL_QUERY}
             WHERE ($1::order_status IS NULL OR o.status = $1)
               AND ($2 OR u.project_id = ANY($3))
             ORDER BY o.created_at DESC, o.id DESC"
        ))
        .bind(filters.status)
        .bind(unrestricted)
        .bind(&actor.project_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn update(
        &self,
        actor: &AuthenticatedUser,
        order_id: Uuid,
        payload: UpdateOrderRequest,
    ) -> Result<DeliveryOrder, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;

        let project_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT u.project_id FROM delivery_orders o JOIN operational_units u ON u.id = o.unit_id WHERE o.id = $1",
        )
        .bind(order_id)
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

        sqlx::query_as::<_, DeliveryOrder>(
            "UPDATE delivery_orders
             SET status = COALESCE($1, status),
                 assigned_to_user_id = COALESCE($2, assigned_to_user_id)
             WHERE id = $3
             RETURNING *",
        )
        .bind(payload.status)
        .bind(payload.assigned_to_user_id)
        .bind(order_id)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Raw insert used by the webhook adapter after it has resolved the unit
    /// and resident.
    pub(crate) async fn insert(
        &self,
        unit_id: Uuid,
        resident_id: Uuid,
        title: &str,
        description: &str,
    ) -> Result<DeliveryOrder, ServiceError> {
        sqlx::query_as::<_, DeliveryOrder>(
            "INSERT INTO delivery_orders (id, unit_id, resident_id, title, description, status, assigned_to_user_id, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,NULL,$7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(unit_id)
        .bind(resident_id)
        .bind(title)
        .bind(description)
        .bind(OrderStatus::New)
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }
}

const ORDER_DETAIL_QUERY: &str = "
    SELECT
        o.id,
        o.unit_id,
        u.code AS unit_code,
        u.project_id,
        p.name AS project_name,
        o.resident_id,
        res.name AS resident_name,
        o.title,
        o.description,
        o.status,
        o.assigned_to_user_id,
        assignee.name AS assigned_to_name,
        o.created_at
    FROM delivery_orders o
    JOIN operational_units u ON u.id = o.unit_id
    JOIN projects p ON p.id = u.project_id
    JOIN residents res ON res.id = o.resident_id
    LEFT JOIN users assignee ON assignee.id = o.assigned_to_user_id";
