//! Accounting note intake and decisions.
//!
//! Backing service for the `/api/accounting-notes` routes. A note starts
//! Pending and moves exactly once to Converted or Rejected; conversion books
//! a single unit expense, drawing down a PM advance or growing the unit's
//! open claim invoice depending on the funding source.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        models::{AccountingNote, NoteStatus, PmAdvance, Role, UnitExpense},
        policy,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError, invoices::ensure_open_claim_invoice};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNoteRequest {
    pub project_id: Uuid,
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(range(min = 1))]
    pub amount_cents: i64,
}

/// Decision payload for `PATCH /api/accounting-notes/:id`. The wire values
/// are the automation-facing spellings `CONVERTED` and `REJECTED`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum NoteDecision {
    #[serde(rename = "CONVERTED")]
    Converted,
    #[serde(rename = "REJECTED")]
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct DecideNoteRequest {
    pub status: NoteDecision,
}

#[derive(Debug, Deserialize)]
pub struct ConvertToExpenseRequest {
    pub pm_advance_id: Uuid,
}

/// Note plus the directory context every listing screen needs.
#[skip_serializing_none]
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NoteDetail {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub unit_id: Uuid,
    pub unit_code: String,
    pub created_by_user_id: Uuid,
    pub created_by_name: String,
    pub description: String,
    pub amount_cents: i64,
    pub status: NoteStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub decided_at: Option<chrono::DateTime<Utc>>,
    pub converted_to_expense_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceConversion {
    pub note: AccountingNote,
    pub expense: UnitExpense,
    pub advance: PmAdvance,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceConversion {
    pub note: AccountingNote,
    pub expense: UnitExpense,
    pub invoice: crate::domain::models::Invoice,
}

/// Service coordinating note persistence and the two conversion paths.
pub struct NoteService {
    pub state: Arc<AppState>,
}

impl NoteService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Records a Pending note from the dashboard.
    ///
    /// * `actor`: project manager, accountant or admin; must have access to
    ///   the target project.
    /// * The unit must belong to the project named in the payload.
    pub async fn create(
        &self,
        actor: &AuthenticatedUser,
        payload: CreateNoteRequest,
    ) -> Result<AccountingNote, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        if !actor.can_access_project(payload.project_id) {
            return Err(ServiceError::Forbidden);
        }

        let unit_project = sqlx::query_scalar::<_, Uuid>(
            "SELECT project_id FROM operational_units WHERE id = $1",
        )
        .bind(payload.unit_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        match unit_project {
            None => return Err(ServiceError::NotFound),
            Some(project_id) if project_id != payload.project_id => {
                return Err(ServiceError::Validation(
                    "Unit does not belong to the project".into(),
                ));
            }
            Some(_) => {}
        }

        self.create_resolved(
            actor.user_id,
            payload.project_id,
            payload.unit_id,
            payload.description.trim(),
            payload.amount_cents,
        )
        .await
    }

    /// Inserts a Pending note for an already-resolved identity. The webhook
    /// adapter resolves the manager and unit itself and calls this directly.
    pub async fn create_resolved(
        &self,
        created_by_user_id: Uuid,
        project_id: Uuid,
        unit_id: Uuid,
        description: &str,
        amount_cents: i64,
    ) -> Result<AccountingNote, ServiceError> {
        sqlx::query_as::<_, AccountingNote>(
            "INSERT INTO accounting_notes (id, project_id, unit_id, created_by_user_id, description, amount_cents, status, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(unit_id)
        .bind(created_by_user_id)
        .bind(description)
        .bind(amount_cents)
        .bind(NoteStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn get(&self, actor: &AuthenticatedUser, note_id: Uuid) -> Result<NoteDetail, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let detail = sqlx::query_as::<_, NoteDetail>(&format!("{NOTE_DETAIL_QUERY} WHERE n.id = $1"))
            .bind(note_id)
            .fetch_optional(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?
            .ok_or(ServiceError::NotFound)?;
        if !actor.can_access_project(detail.project_id) {
            return Err(ServiceError::Forbidden);
        }
        Ok(detail)
    }

    /// Lists notes, newest first. Project managers only see projects they are
    /// assigned to unless the directory grants them the all-projects flag.
    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        status: Option<NoteStatus>,
    ) -> Result<Vec<NoteDetail>, ServiceError> {
        ensure_role(actor, &[Role::ProjectManager, Role::Accountant, Role::Admin])?;
        let unrestricted =
            matches!(actor.role, Role::Admin | Role::Accountant) || actor.can_view_all_projects;
        sqlx::query_as::<_, NoteDetail>(&format!(
            "{NOTE_DETAIL_QUERY}
             WHERE ($1::note_status IS NULL OR n.status = $1)
               AND ($2 OR n.project_id = ANY($3))
             ORDER BY n.created_at DESC, n.id DESC"
        ))
        .bind(status)
        .bind(unrestricted)
        .bind(&actor.project_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Converts a Pending note against a PM advance.
    ///
    /// In one transaction: books the unit expense, stamps the note Converted
    /// and draws the note amount from the advance (floored at zero). The
    /// advance must belong to the note's project. Concurrent decisions
    /// serialize on the locked note row; the loser gets `Conflict`.
    pub async fn convert_to_expense(
        &self,
        actor: &AuthenticatedUser,
        note_id: Uuid,
        payload: ConvertToExpenseRequest,
    ) -> Result<AdvanceConversion, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let note = lock_note(&mut tx, note_id).await?;
        if note.status != NoteStatus::Pending {
            return Err(ServiceError::Conflict);
        }

        let advance = sqlx::query_as::<_, PmAdvance>(
            "SELECT * FROM pm_advances WHERE id = $1 FOR UPDATE",
        )
        .bind(payload.pm_advance_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let evaluation = policy::evaluate_advance_conversion(&note, &advance);
        if !evaluation.is_valid {
            return Err(ServiceError::Validation(evaluation.violations.join("; ")));
        }

        let expense =
            insert_conversion_expense(&mut tx, &note, actor.user_id, Some(advance.id), None).await?;
        let note = mark_converted(&mut tx, note.id, expense.id).await?;
        let advance = sqlx::query_as::<_, PmAdvance>(
            "UPDATE pm_advances SET remaining_cents = GREATEST(0, remaining_cents - $1) WHERE id = $2 RETURNING *",
        )
        .bind(note.amount_cents)
        .bind(advance.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(AdvanceConversion {
            note,
            expense,
            advance,
        })
    }

    /// Applies a dashboard decision: `CONVERTED` books the note onto the
    /// unit's open claim invoice (created on demand), `REJECTED` closes the
    /// note untouched. Both require an accountant or admin and a Pending note.
    pub async fn decide(
        &self,
        actor: &AuthenticatedUser,
        note_id: Uuid,
        payload: DecideNoteRequest,
    ) -> Result<NoteDecisionOutcome, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        match payload.status {
            NoteDecision::Converted => self
                .convert_to_invoice(actor, note_id)
                .await
                .map(NoteDecisionOutcome::Converted),
            NoteDecision::Rejected => self.reject(note_id).await.map(NoteDecisionOutcome::Rejected),
        }
    }

    async fn convert_to_invoice(
        &self,
        actor: &AuthenticatedUser,
        note_id: Uuid,
    ) -> Result<InvoiceConversion, ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let note = lock_note(&mut tx, note_id).await?;
        if note.status != NoteStatus::Pending {
            return Err(ServiceError::Conflict);
        }

        let association_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM owner_associations WHERE unit_id = $1",
        )
        .bind(note.unit_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let invoice = ensure_open_claim_invoice(&mut tx, note.unit_id, association_id).await?;
        let expense =
            insert_conversion_expense(&mut tx, &note, actor.user_id, None, Some(invoice.id)).await?;
        let note = mark_converted(&mut tx, note.id, expense.id).await?;
        let invoice = sqlx::query_as::<_, crate::domain::models::Invoice>(
            "UPDATE invoices SET amount_cents = amount_cents + $1, remaining_cents = remaining_cents + $1 WHERE id = $2 RETURNING *",
        )
        .bind(note.amount_cents)
        .bind(invoice.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(InvoiceConversion {
            note,
            expense,
            invoice,
        })
    }

    async fn reject(&self, note_id: Uuid) -> Result<AccountingNote, ServiceError> {
        let record = sqlx::query_as::<_, AccountingNote>(
            "UPDATE accounting_notes SET status=$1, decided_at=$2 WHERE id=$3 AND status='pending' RETURNING *",
        )
        .bind(NoteStatus::Rejected)
        .bind(Utc::now())
        .bind(note_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if let Some(record) = record {
            return Ok(record);
        }

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM accounting_notes WHERE id = $1",
        )
        .bind(note_id)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if exists == 0 {
            Err(ServiceError::NotFound)
        } else {
            Err(ServiceError::Conflict)
        }
    }

    /// Deletes a note. Admin only, and only while the note is still Pending;
    /// decided notes are audit history and stay.
    pub async fn delete(&self, actor: &AuthenticatedUser, note_id: Uuid) -> Result<(), ServiceError> {
        ensure_role(actor, &[Role::Admin])?;
        let result = sqlx::query("DELETE FROM accounting_notes WHERE id=$1 AND status='pending'")
            .bind(note_id)
            .execute(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM accounting_notes WHERE id = $1",
        )
        .bind(note_id)
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

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum NoteDecisionOutcome {
    Converted(InvoiceConversion),
    Rejected(AccountingNote),
}

const NOTE_DETAIL_QUERY: &str = "
    SELECT
        n.id,
        n.project_id,
        p.name AS project_name,
        n.unit_id,
        u.code AS unit_code,
        n.created_by_user_id,
        c.name AS created_by_name,
        n.description,
        n.amount_cents,
        n.status,
        n.created_at,
        n.decided_at,
        n.converted_to_expense_id
    FROM accounting_notes n
    JOIN projects p ON p.id = n.project_id
    JOIN operational_units u ON u.id = n.unit_id
    JOIN users c ON c.id = n.created_by_user_id";

async fn lock_note(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    note_id: Uuid,
) -> Result<AccountingNote, ServiceError> {
    sqlx::query_as::<_, AccountingNote>("SELECT * FROM accounting_notes WHERE id = $1 FOR UPDATE")
        .bind(note_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)
}

async fn insert_conversion_expense(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    note: &AccountingNote,
    recorded_by_user_id: Uuid,
    pm_advance_id: Option<Uuid>,
    claim_invoice_id: Option<Uuid>,
) -> Result<UnitExpense, ServiceError> {
    sqlx::query_as::<_, UnitExpense>(
        "INSERT INTO unit_expenses (id, unit_id, description, amount_cents, source_type, expense_date, recorded_by_user_id, pm_advance_id, claim_invoice_id, from_accounting_note_id, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(note.unit_id)
    .bind(&note.description)
    .bind(note.amount_cents)
    .bind(crate::domain::models::ExpenseSource::Other)
    .bind(Utc::now().date_naive())
    .bind(recorded_by_user_id)
    .bind(pm_advance_id)
    .bind(claim_invoice_id)
    .bind(note.id)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| ServiceError::Internal(err.to_string()))
}

async fn mark_converted(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    note_id: Uuid,
    expense_id: Uuid,
) -> Result<AccountingNote, ServiceError> {
    sqlx::query_as::<_, AccountingNote>(
        "UPDATE accounting_notes SET status=$1, decided_at=$2, converted_to_expense_id=$3 WHERE id=$4 RETURNING *",
    )
    .bind(NoteStatus::Converted)
    .bind(Utc::now())
    .bind(expense_id)
    .bind(note_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| ServiceError::Internal(err.to_string()))
}
