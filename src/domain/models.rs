use std::{convert::TryFrom, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef},
    FromRow, Postgres, Type, TypeInfo,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Accountant,
    ProjectManager,
    Resident,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Accountant => "accountant",
            Role::ProjectManager => "project_manager",
            Role::Resident => "resident",
        }
    }
}

impl Role {
    fn parse_normalized(value: &str) -> Result<Self, RoleParseError> {
        match value {
            "admin" => Ok(Role::Admin),
            "accountant" => Ok(Role::Accountant),
            "project_manager" => Ok(Role::ProjectManager),
            "resident" => Ok(Role::Resident),
            _ => Err(RoleParseError::new(value)),
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = RoleParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Role::parse_normalized(&normalized)
    }
}

impl Type<Postgres> for Role {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("user_role")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        matches!(ty.name(), "user_role" | "text" | "varchar" | "bpchar")
    }
}

impl PgHasArrayType for Role {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_user_role")
    }
}

impl<'q> Encode<'q, Postgres> for Role {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for Role {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        Role::try_from(raw).map_err(|err| Box::new(err) as BoxDynError)
    }
}

#[derive(Debug, Clone)]
pub struct RoleParseError {
    value: String,
}

impl RoleParseError {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported role value: {}", self.value)
    }
}

impl std::error::Error for RoleParseError {}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub whatsapp_phone: Option<String>,
    pub role: Role,
    pub can_view_all_projects: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OperationalUnit {
    pub id: Uuid,
    pub project_id: Uuid,
    pub code: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OwnerAssociation {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Resident {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_phone: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "note_status", rename_all = "snake_case")]
pub enum NoteStatus {
    Pending,
    Converted,
    Rejected,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Pending => "pending",
            NoteStatus::Converted => "converted",
            NoteStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountingNote {
    pub id: Uuid,
    pub project_id: Uuid,
    pub unit_id: Uuid,
    pub created_by_user_id: Uuid,
    pub description: String,
    pub amount_cents: i64,
    pub status: NoteStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub converted_to_expense_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "expense_source", rename_all = "snake_case")]
pub enum ExpenseSource {
    OfficeFund,
    PmAdvance,
    Other,
}

impl ExpenseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseSource::OfficeFund => "office_fund",
            ExpenseSource::PmAdvance => "pm_advance",
            ExpenseSource::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnitExpense {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub description: String,
    pub amount_cents: i64,
    pub source_type: ExpenseSource,
    pub expense_date: NaiveDate,
    pub recorded_by_user_id: Uuid,
    pub pm_advance_id: Option<Uuid>,
    pub claim_invoice_id: Option<Uuid>,
    pub from_accounting_note_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "invoice_type", rename_all = "snake_case")]
pub enum InvoiceType {
    MonthlyService,
    Claim,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::MonthlyService => "monthly_service",
            InvoiceType::Claim => "claim",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub unit_id: Uuid,
    pub owner_association_id: Uuid,
    pub amount_cents: i64,
    pub total_paid_cents: i64,
    pub remaining_cents: i64,
    pub is_paid: bool,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PmAdvance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub amount_cents: i64,
    pub remaining_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "ticket_priority", rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Normal => "normal",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }

    /// Automation tools spell priorities in whatever casing they were
    /// configured with, so the webhook path parses them loosely.
    pub fn parse_loose(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(TicketPriority::Low),
            "normal" | "medium" => Some(TicketPriority::Normal),
            "high" => Some(TicketPriority::High),
            "urgent" => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub resident_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_to_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    InProgress,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub resident_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: OrderStatus,
    pub assigned_to_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StaffMember {
    pub id: Uuid,
    pub name: String,
    pub salary_cents: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "staff_advance_status", rename_all = "snake_case")]
pub enum StaffAdvanceStatus {
    Pending,
    Deducted,
}

impl StaffAdvanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffAdvanceStatus::Pending => "pending",
            StaffAdvanceStatus::Deducted => "deducted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StaffAdvance {
    pub id: Uuid,
    pub staff_member_id: Uuid,
    pub amount_cents: i64,
    pub status: StaffAdvanceStatus,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "payroll_status", rename_all = "snake_case")]
pub enum PayrollStatus {
    Pending,
    Paid,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollStatus::Pending => "pending",
            PayrollStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payroll {
    pub id: Uuid,
    pub month: String,
    pub total_gross_cents: i64,
    pub total_advances_cents: i64,
    pub total_net_cents: i64,
    pub status: PayrollStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayrollItem {
    pub id: Uuid,
    pub payroll_id: Uuid,
    pub staff_member_id: Uuid,
    pub staff_name: String,
    pub salary_cents: i64,
    pub advances_cents: i64,
    pub net_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AutomationKey {
    pub id: Uuid,
    pub label: String,
    pub token: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub status_code: i32,
    pub error: Option<String>,
    pub automation_key_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
