//! Webhook ingest adapters for the messaging automation tool.
//!
//! Each adapter authenticates the payload (HMAC signature or API key) before
//! touching the database, translates it into the same creation paths the
//! dashboard uses, and returns a rendered Arabic notification for relay. This
//! service renders messages; it never sends them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::{
        models::{AutomationKey, OperationalUnit, Role, TicketPriority},
        notify, phone, policy, reference,
    },
    infrastructure::{signature, state::AppState},
    services::{notes::NoteService, orders::OrderService, tickets::TicketService},
};

use super::errors::ServiceError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountingNotePayload {
    #[serde(alias = "senderPhone", alias = "from")]
    pm_phone: Option<String>,
    pm_email: Option<String>,
    #[serde(alias = "unit")]
    unit_code: Option<String>,
    project_id: Option<Uuid>,
    amount: Option<Value>,
    #[serde(alias = "description")]
    reason: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResidentEventPayload {
    #[serde(alias = "senderPhone", alias = "from")]
    resident_phone: Option<String>,
    #[serde(alias = "unit")]
    unit_code: Option<String>,
    project_id: Option<Uuid>,
    #[serde(alias = "text", alias = "message")]
    description: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyedTicketPayload {
    resident_name: Option<String>,
    unit_code: Option<String>,
    title: Option<String>,
    description: Option<String>,
    resident_email: Option<String>,
    resident_phone: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteIngestResponse {
    pub note_id: Uuid,
    pub whatsapp_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketIngestResponse {
    pub ticket_id: Uuid,
    pub reference: String,
    pub whatsapp_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIngestResponse {
    pub order_id: Uuid,
    pub reference: String,
    pub whatsapp_message: String,
}

pub struct WebhookService {
    pub state: Arc<AppState>,
}

impl WebhookService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// `POST /api/webhooks/accounting-note` (HMAC). Resolves the sending
    /// project manager by phone variants or email, the unit by
    /// `(code, projectId)`, and records a Pending note.
    pub async fn ingest_accounting_note(
        &self,
        provided_signature: Option<&str>,
        body: &[u8],
    ) -> Result<NoteIngestResponse, ServiceError> {
        self.verify_signature(provided_signature, body)?;
        let payload: AccountingNotePayload =
            serde_json::from_slice(body).map_err(|err| ServiceError::Validation(err.to_string()))?;

        let project_id = payload
            .project_id
            .ok_or_else(|| ServiceError::Validation("projectId is required".into()))?;
        let unit_code = required_text(payload.unit_code.as_deref(), "unitCode")?;
        let reason = required_text(payload.reason.as_deref(), "reason")?;
        let amount_cents = payload
            .amount
            .as_ref()
            .and_then(policy::amount_to_cents)
            .ok_or_else(|| {
                ServiceError::Validation("amount must be a positive finite number".into())
            })?;

        let manager = self
            .resolve_manager(payload.pm_phone.as_deref(), payload.pm_email.as_deref())
            .await?;
        if !manager.can_view_all_projects {
            let assigned = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(1) FROM project_assignments WHERE user_id = $1 AND project_id = $2",
            )
            .bind(manager.id)
            .bind(project_id)
            .fetch_one(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
            if assigned == 0 {
                return Err(ServiceError::Forbidden);
            }
        }

        let unit = self.resolve_unit(&unit_code, project_id).await?;
        let project_name =
            sqlx::query_scalar::<_, String>("SELECT name FROM projects WHERE id = $1")
                .bind(project_id)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let description = match payload.notes.as_deref().map(str::trim) {
            Some(notes) if !notes.is_empty() => format!("{reason}\n{notes}"),
            _ => reason,
        };
        let note = NoteService::new(Arc::clone(&self.state))
            .create_resolved(manager.id, project_id, unit.id, &description, amount_cents)
            .await?;

        Ok(NoteIngestResponse {
            note_id: note.id,
            whatsapp_message: notify::accounting_note_created(
                &note,
                &project_name,
                &unit.code,
                &manager.name,
            ),
        })
    }

    /// `POST /api/webhooks/ticket` (HMAC). Resident complaint relayed from
    /// the messaging channel. The processing outcome is recorded best effort
    /// in `webhook_events`.
    pub async fn ingest_ticket(
        &self,
        provided_signature: Option<&str>,
        body: &[u8],
    ) -> Result<TicketIngestResponse, ServiceError> {
        self.verify_signature(provided_signature, body)?;
        let outcome = self.process_ticket(body).await;
        self.log_event("whatsapp", "ticket", &outcome, None).await;
        outcome
    }

    /// `POST /api/webhooks/delivery-order` (HMAC).
    pub async fn ingest_delivery_order(
        &self,
        provided_signature: Option<&str>,
        body: &[u8],
    ) -> Result<OrderIngestResponse, ServiceError> {
        self.verify_signature(provided_signature, body)?;
        let outcome = self.process_delivery_order(body).await;
        self.log_event("whatsapp", "delivery_order", &outcome, None)
            .await;
        outcome
    }

    /// `POST /api/webhooks/tickets` (API key). The key must be active and
    /// carry the Resident role. The resident is located by `(name, unit
    /// code)` or created under the unit, refreshing contact details when the
    /// payload carries them.
    pub async fn ingest_keyed_ticket(
        &self,
        provided_key: Option<&str>,
        body: &[u8],
    ) -> Result<TicketIngestResponse, ServiceError> {
        let key = self.authenticate_key(provided_key).await?;
        if key.role != Role::Resident {
            let outcome = Err(ServiceError::Forbidden);
            self.log_event("automation_key", "ticket", &outcome, Some(key.id))
                .await;
            return outcome;
        }

        let outcome = self.process_keyed_ticket(body).await;
        self.log_event("automation_key", "ticket", &outcome, Some(key.id))
            .await;
        outcome
    }

    async fn process_ticket(&self, body: &[u8]) -> Result<TicketIngestResponse, ServiceError> {
        let payload: ResidentEventPayload =
            serde_json::from_slice(body).map_err(|err| ServiceError::Validation(err.to_string()))?;
        let (unit, resident_id, resident_name, project_name, description) =
            self.resolve_resident_event(&payload).await?;

        let priority = payload
            .priority
            .as_deref()
            .and_then(TicketPriority::parse_loose)
            .unwrap_or(TicketPriority::Normal);
        let title = policy::ticket_title(&description);
        let ticket = TicketService::new(Arc::clone(&self.state))
            .insert(unit.id, resident_id, &title, &description, priority)
            .await?;

        Ok(TicketIngestResponse {
            ticket_id: ticket.id,
            reference: reference::ticket_number(ticket.id),
            whatsapp_message: notify::ticket_received(
                &resident_name,
                &project_name,
                &unit.code,
                &description,
            ),
        })
    }

    async fn process_delivery_order(
        &self,
        body: &[u8],
    ) -> Result<OrderIngestResponse, ServiceError> {
        let payload: ResidentEventPayload =
            serde_json::from_slice(body).map_err(|err| ServiceError::Validation(err.to_string()))?;
        let (unit, resident_id, resident_name, project_name, description) =
            self.resolve_resident_event(&payload).await?;

        let title = policy::ticket_title(&description);
        let order = OrderService::new(Arc::clone(&self.state))
            .insert(unit.id, resident_id, &title, &description)
            .await?;

        Ok(OrderIngestResponse {
            order_id: order.id,
            reference: reference::order_number(order.id),
            whatsapp_message: notify::delivery_order_received(
                &resident_name,
                &project_name,
                &unit.code,
                &description,
            ),
        })
    }

    async fn process_keyed_ticket(
        &self,
        body: &[u8],
    ) -> Result<TicketIngestResponse, ServiceError> {
        let payload: KeyedTicketPayload =
            serde_json::from_slice(body).map_err(|err| ServiceError::Validation(err.to_string()))?;
        let resident_name = required_text(payload.resident_name.as_deref(), "residentName")?;
        let unit_code = required_text(payload.unit_code.as_deref(), "unitCode")?;
        let title = required_text(payload.title.as_deref(), "title")?;
        let description = required_text(payload.description.as_deref(), "description")?;

        let unit = sqlx::query_as::<_, OperationalUnit>(
            "SELECT * FROM operational_units WHERE code = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(&unit_code)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;
        let project_name =
            sqlx::query_scalar::<_, String>("SELECT name FROM projects WHERE id = $1")
                .bind(unit.project_id)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let email = payload.resident_email.as_deref().map(str::trim);
        let resident_phone = payload.resident_phone.as_deref().map(str::trim);
        let resident_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM residents WHERE unit_id = $1 AND name = $2
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(unit.id)
        .bind(&resident_name)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let resident_id = match resident_id {
            Some(id) => {
                sqlx::query(
                    "UPDATE residents
                     SET email = COALESCE($1, email),
                         phone = COALESCE($2, phone)
                     WHERE id = $3",
                )
                .bind(email)
                .bind(resident_phone)
                .bind(id)
                .execute(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
                id
            }
            None => sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO residents (id, unit_id, name, email, phone, status, created_at)
                 VALUES ($1,$2,$3,$4,$5,'ACTIVE',$6)
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(unit.id)
            .bind(&resident_name)
            .bind(email)
            .bind(resident_phone)
            .bind(chrono::Utc::now())
            .fetch_one(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?,
        };

        let title = policy::ticket_title(&title);
        let priority = payload
            .priority
            .as_deref()
            .and_then(TicketPriority::parse_loose)
            .unwrap_or(TicketPriority::Normal);
        let ticket = TicketService::new(Arc::clone(&self.state))
            .insert(unit.id, resident_id, &title, &description, priority)
            .await?;

        Ok(TicketIngestResponse {
            ticket_id: ticket.id,
            reference: reference::ticket_number(ticket.id),
            whatsapp_message: notify::ticket_received(
                &resident_name,
                &project_name,
                &unit.code,
                &description,
            ),
        })
    }

    async fn resolve_resident_event(
        &self,
        payload: &ResidentEventPayload,
    ) -> Result<(OperationalUnit, Uuid, String, String, String), ServiceError> {
        let project_id = payload
            .project_id
            .ok_or_else(|| ServiceError::Validation("projectId is required".into()))?;
        let unit_code = required_text(payload.unit_code.as_deref(), "unitCode")?;
        let description = required_text(payload.description.as_deref(), "description")?;
        let resident_phone = required_text(payload.resident_phone.as_deref(), "residentPhone")?;

        let unit = self.resolve_unit(&unit_code, project_id).await?;
        let variants = phone::phone_variants(&resident_phone);
        let resident: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, name FROM residents
             WHERE unit_id = $1 AND (phone = ANY($2) OR whatsapp_phone = ANY($2))
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(unit.id)
        .bind(&variants)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let (resident_id, resident_name) = resident.ok_or(ServiceError::NotFound)?;

        let project_name =
            sqlx::query_scalar::<_, String>("SELECT name FROM projects WHERE id = $1")
                .bind(project_id)
                .fetch_one(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok((unit, resident_id, resident_name, project_name, description))
    }

    async fn resolve_manager(
        &self,
        pm_phone: Option<&str>,
        pm_email: Option<&str>,
    ) -> Result<ManagerRow, ServiceError> {
        let variants = pm_phone.map(phone::phone_variants).unwrap_or_default();
        let email = pm_email.map(str::trim).filter(|email| !email.is_empty());
        if variants.is_empty() && email.is_none() {
            return Err(ServiceError::Validation(
                "A sender phone or email is required".into(),
            ));
        }

        sqlx::query_as::<_, ManagerRow>(
            "SELECT id, name, can_view_all_projects FROM users
             WHERE role = 'project_manager'
               AND (whatsapp_phone = ANY($1) OR LOWER(email) = LOWER($2))
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(&variants)
        .bind(email)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)
    }

    async fn resolve_unit(
        &self,
        code: &str,
        project_id: Uuid,
    ) -> Result<OperationalUnit, ServiceError> {
        sqlx::query_as::<_, OperationalUnit>(
            "SELECT * FROM operational_units WHERE project_id = $1 AND code = $2",
        )
        .bind(project_id)
        .bind(code)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)
    }

    fn verify_signature(
        &self,
        provided_signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), ServiceError> {
        let secret = &self.state.config.webhooks.shared_secret;
        let provided = provided_signature.ok_or(ServiceError::Unauthorized)?;
        if !signature::verify_signature(secret, body, provided) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }

    async fn authenticate_key(
        &self,
        provided_key: Option<&str>,
    ) -> Result<AutomationKey, ServiceError> {
        let provided = provided_key.ok_or(ServiceError::Unauthorized)?;
        let keys = sqlx::query_as::<_, AutomationKey>(
            "SELECT * FROM automation_keys WHERE active",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        keys.into_iter()
            .find(|key| signature::tokens_match(&key.token, provided))
            .ok_or(ServiceError::Unauthorized)
    }

    /// Best-effort audit row; a logging failure is warned about, never
    /// surfaced in place of the processing outcome.
    async fn log_event<T>(
        &self,
        source: &str,
        event_type: &str,
        outcome: &Result<T, ServiceError>,
        automation_key_id: Option<Uuid>,
    ) {
        let (status_code, error) = match outcome {
            Ok(_) => (200, None),
            Err(err) => (err.status_code().as_u16() as i32, Some(err.to_string())),
        };
        let logged = sqlx::query(
            "INSERT INTO webhook_events (id, source, event_type, status_code, error, automation_key_id, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(Uuid::new_v4())
        .bind(source)
        .bind(event_type)
        .bind(status_code)
        .bind(error)
        .bind(automation_key_id)
        .bind(chrono::Utc::now())
        .execute(&self.state.pool)
        .await;
        if let Err(err) = logged {
            warn!(error = ?err, source, event_type, "failed to record webhook event");
        }
    }
}

fn required_text(value: Option<&str>, field: &str) -> Result<String, ServiceError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ServiceError::Validation(format!("{field} is required"))),
    }
}

#[derive(FromRow)]
struct ManagerRow {
    id: Uuid,
    name: String,
    can_view_all_projects: bool,
}
