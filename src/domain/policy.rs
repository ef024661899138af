use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::{AccountingNote, Invoice, PmAdvance};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

impl PolicyEvaluation {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
        }
    }

    pub fn with_violation(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            violations: vec![message.into()],
        }
    }
}

pub fn evaluate_payment(invoice: &Invoice, payment_cents: i64) -> PolicyEvaluation {
    if invoice.is_paid {
        return PolicyEvaluation::with_violation("Invoice is already settled");
    }
    if payment_cents <= 0 {
        return PolicyEvaluation::with_violation("Payment must be a positive amount");
    }
    if payment_cents > invoice.remaining_cents {
        return PolicyEvaluation::with_violation("Payment exceeds the remaining balance");
    }
    PolicyEvaluation::ok()
}

pub fn evaluate_advance_conversion(note: &AccountingNote, advance: &PmAdvance) -> PolicyEvaluation {
    if advance.project_id != note.project_id {
        return PolicyEvaluation::with_violation("Advance belongs to a different project");
    }
    PolicyEvaluation::ok()
}

// Over-draws are absorbed rather than rejected; the ledger floor is zero.
pub fn advance_after_draw(remaining_cents: i64, draw_cents: i64) -> i64 {
    (remaining_cents - draw_cents).max(0)
}

pub fn project_visible(can_view_all: bool, assigned: &[Uuid], project_id: Uuid) -> bool {
    can_view_all || assigned.contains(&project_id)
}

/// Monetary inputs arrive as JSON numbers or numeric strings in major units.
/// Returns the amount in cents, or `None` when it is not a positive finite
/// number that fits the ledger.
pub fn amount_to_cents(value: &Value) -> Option<i64> {
    let units = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !units.is_finite() || units <= 0.0 {
        return None;
    }
    let cents = (units * 100.0).round();
    // Past 2^53 the f64 grid is coarser than a cent.
    if cents <= 0.0 || cents >= 9_007_199_254_740_992.0 {
        return None;
    }
    Some(cents as i64)
}

pub fn month_key_is_valid(month: &str) -> bool {
    let bytes = month.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    let year_ok = month[..4].chars().all(|c| c.is_ascii_digit());
    let month_number = month[5..].parse::<u8>();
    year_ok && matches!(month_number, Ok(1..=12))
}

pub fn ticket_title(text: &str) -> String {
    text.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn invoice(remaining_cents: i64, is_paid: bool) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            invoice_number: "INV-TEST".to_string(),
            invoice_type: crate::domain::models::InvoiceType::Claim,
            unit_id: Uuid::new_v4(),
            owner_association_id: Uuid::new_v4(),
            amount_cents: 50_000,
            total_paid_cents: 50_000 - remaining_cents,
            remaining_cents,
            is_paid,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn evaluate_payment_rejects_over_payment() {
        let evaluation = evaluate_payment(&invoice(10_000, false), 15_000);
        assert!(!evaluation.is_valid);
        assert!(evaluation
            .violations
            .iter()
            .any(|msg| msg.contains("remaining balance")));
    }

    #[test]
    fn evaluate_payment_rejects_non_positive_and_settled() {
        assert!(!evaluate_payment(&invoice(10_000, false), 0).is_valid);
        assert!(!evaluate_payment(&invoice(0, true), 1_000).is_valid);
    }

    #[test]
    fn evaluate_payment_accepts_exact_remaining() {
        assert!(evaluate_payment(&invoice(10_000, false), 10_000).is_valid);
    }

    #[test]
    fn advance_draw_floors_at_zero() {
        assert_eq!(advance_after_draw(70_000, 30_000), 40_000);
        assert_eq!(advance_after_draw(20_000, 30_000), 0);
        assert_eq!(advance_after_draw(0, 1), 0);
    }

    #[test]
    fn amount_parsing_accepts_numbers_and_numeric_strings() {
        assert_eq!(amount_to_cents(&serde_json::json!(250.5)), Some(25_050));
        assert_eq!(amount_to_cents(&serde_json::json!("300")), Some(30_000));
        assert_eq!(amount_to_cents(&serde_json::json!(" 12.345 ")), Some(1_235));
    }

    #[test]
    fn amount_parsing_rejects_junk() {
        assert_eq!(amount_to_cents(&serde_json::json!(0)), None);
        assert_eq!(amount_to_cents(&serde_json::json!(-3)), None);
        assert_eq!(amount_to_cents(&serde_json::json!("abc")), None);
        assert_eq!(amount_to_cents(&serde_json::json!(f64::NAN)), None);
        assert_eq!(amount_to_cents(&serde_json::json!(null)), None);
        assert_eq!(amount_to_cents(&serde_json::json!([1])), None);
    }

    #[test]
    fn month_key_shape() {
        assert!(month_key_is_valid("2026-01"));
        assert!(month_key_is_valid("2026-12"));
        assert!(!month_key_is_valid("2026-13"));
        assert!(!month_key_is_valid("2026-1"));
        assert!(!month_key_is_valid("202601"));
        assert!(!month_key_is_valid("26-01-01"));
    }

    #[test]
    fn ticket_title_truncates_on_character_boundaries() {
        let long = "م".repeat(140);
        let title = ticket_title(&long);
        assert_eq!(title.chars().count(), 100);
        assert!(long.starts_with(&title));
        assert_eq!(ticket_title("short complaint"), "short complaint");
    }
}
