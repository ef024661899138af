//! Invoice balances and payments. `remaining = amount - total_paid` at all
//! times, over-payments are rejected, and settling an invoice provisions the
//! unit's next open claim invoice.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    domain::{
        models::{Invoice, InvoiceType, Role, UnitExpense},
        policy, reference,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_role, errors::ServiceError};

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub action: String,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilters {
    pub unit_id: Option<Uuid>,
    pub is_paid: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    pub id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub unit_id: Uuid,
    pub unit_code: String,
    pub project_name: String,
    pub owner_association_id: Uuid,
    pub owner_association_name: String,
    pub amount_cents: i64,
    pub total_paid_cents: i64,
    pub remaining_cents: i64,
    pub is_paid: bool,
    pub issued_at: DateTime<Utc>,
    pub expenses: Vec<UnitExpense>,
}

pub struct InvoiceService {
    pub state: Arc<AppState>,
}

impl InvoiceService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        filters: InvoiceFilters,
    ) -> Result<Vec<InvoiceDetail>, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            "{INVOICE_DETAIL_QUERY}
             WHERE ($1::uuid IS NULL OR i.unit_id = $1)
               AND ($2::boolean IS NULL OR i.is_paid = $2)
             ORDER BY i.issued_at DESC, i.id DESC"
        ))
        .bind(filters.unit_id)
        .bind(filters.is_paid)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        self.attach_expenses(rows).await
    }

    pub async fn get(
        &self,
        actor: &AuthenticatedUser,
        invoice_id: Uuid,
    ) -> Result<InvoiceDetail, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        self.fetch_detail(invoice_id).await
    }

    /// Applies a payment through `PATCH /api/invoices/:id`.
    ///
    /// `action` is `"mark-paid"` (pay off the remaining balance) or `"pay"`
    /// (pay `amount_cents`). Payments must be positive and at most the
    /// remaining balance; nothing is mutated otherwise. Settling the invoice
    /// in full provisions the unit's next empty open claim invoice inside the
    /// same transaction.
    pub async fn apply_payment(
        &self,
        actor: &AuthenticatedUser,
        invoice_id: Uuid,
        payload: PaymentRequest,
    ) -> Result<InvoiceDetail, ServiceError> {
        ensure_role(actor, &[Role::Accountant, Role::Admin])?;
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let invoice =
            sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?
                .ok_or(ServiceError::NotFound)?;

        let payment_cents = match payload.action.as_str() {
            "mark-paid" => invoice.remaining_cents,
            "pay" => payload
                .amount_cents
                .ok_or_else(|| ServiceError::Validation("Payment amount is required".into()))?,
            _ => {
                return Err(ServiceError::Validation(format!(
                    "Unsupported action: {}",
                    payload.action
                )));
            }
        };

        let evaluation = policy::evaluate_payment(&invoice, payment_cents);
        if !evaluation.is_valid {
            return Err(ServiceError::Validation(evaluation.violations.join("; ")));
        }

        let updated = sqlx::query_as::<_, Invoice>(
            "UPDATE invoices
             SET total_paid_cents = total_paid_cents + $1,
                 remaining_cents = remaining_cents - $1,
                 is_paid = (remaining_cents - $1) <= 0
             WHERE id = $2
             RETURNING *",
        )
        .bind(payment_cents)
        .bind(invoice.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if updated.is_paid {
            ensure_open_claim_invoice(&mut tx, updated.unit_id, updated.owner_association_id)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        self.fetch_detail(updated.id).await
    }

    async fn fetch_detail(&self, invoice_id: Uuid) -> Result<InvoiceDetail, ServiceError> {
        let row: Option<InvoiceRow> =
            sqlx::query_as(&format!("{INVOICE_DETAIL_QUERY} WHERE i.id = $1"))
                .bind(invoice_id)
                .fetch_optional(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let row = row.ok_or(ServiceError::NotFound)?;
        let mut details = self.attach_expenses(vec![row]).await?;
        details.pop().ok_or(ServiceError::NotFound)
    }

    async fn attach_expenses(
        &self,
        rows: Vec<InvoiceRow>,
    ) -> Result<Vec<InvoiceDetail>, ServiceError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let invoice_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let expenses: Vec<UnitExpense> = sqlx::query_as(
            "SELECT * FROM unit_expenses WHERE claim_invoice_id = ANY($1) ORDER BY created_at ASC, id ASC",
        )
        .bind(&invoice_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut by_invoice: HashMap<Uuid, Vec<UnitExpense>> = HashMap::new();
        for expense in expenses {
            if let Some(invoice_id) = expense.claim_invoice_id {
                by_invoice.entry(invoice_id).or_default().push(expense);
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let expenses = by_invoice.remove(&row.id).unwrap_or_default();
                row.into_detail(expenses)
            })
            .collect())
    }
}

/// Locks and returns the unit's single open claim invoice, creating an empty
/// one when none is open. The partial unique index on
/// `invoices (unit_id) WHERE invoice_type='claim' AND NOT is_paid` makes the
/// insert race-safe: a concurrent winner's row is simply selected instead.
pub(crate) async fn ensure_open_claim_invoice(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    unit_id: Uuid,
    owner_association_id: Uuid,
) -> Result<Invoice, ServiceError> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO invoices (id, invoice_number, invoice_type, unit_id, owner_association_id, amount_cents, total_paid_cents, remaining_cents, is_paid, issued_at)
         VALUES ($1,$2,'claim',$3,$4,0,0,0,FALSE,$5)
         ON CONFLICT (unit_id) WHERE invoice_type = 'claim' AND NOT is_paid DO NOTHING",
    )
    .bind(id)
    .bind(reference::invoice_number(id))
    .bind(unit_id)
    .bind(owner_association_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await
    .map_err(|err| ServiceError::Internal(err.to_string()))?;

    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE unit_id = $1 AND invoice_type = 'claim' AND NOT is_paid FOR UPDATE",
    )
    .bind(unit_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| ServiceError::Internal(err.to_string()))
}

const INVOICE_DETAIL_QUERY: &str = "
    SELECT
        i.id,
        i.invoice_number,
        i.invoice_type,
        i.unit_id,
        u.code AS unit_code,
        p.name AS project_name,
        i.owner_association_id,
        a.name AS owner_association_name,
        i.amount_cents,
        i.total_paid_cents,
        i.remaining_cents,
        i.is_paid,
        i.issued_at
    FROM invoices i
    JOIN operational_units u ON u.id = i.unit_id
    JOIN projects p ON p.id = u.project_id
    JOIN owner_associations a ON a.id = i.owner_association_id";

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    invoice_type: InvoiceType,
    unit_id: Uuid,
    unit_code: String,
    project_name: String,
    owner_association_id: Uuid,
    owner_association_name: String,
    amount_cents: i64,
    total_paid_cents: i64,
    remaining_cents: i64,
    is_paid: bool,
    issued_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_detail(self, expenses: Vec<UnitExpense>) -> InvoiceDetail {
        InvoiceDetail {
            id: self.id,
            invoice_number: self.invoice_number,
            invoice_type: self.invoice_type,
            unit_id: self.unit_id,
            unit_code: self.unit_code,
            project_name: self.project_name,
            owner_association_id: self.owner_association_id,
            owner_association_name: self.owner_association_name,
            amount_cents: self.amount_cents,
            total_paid_cents: self.total_paid_cents,
            remaining_cents: self.remaining_cents,
            is_paid: self.is_paid,
            issued_at: self.issued_at,
            expenses,
        }
    }
}
