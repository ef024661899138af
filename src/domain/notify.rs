//! Rendered notification bodies for the WhatsApp relay. Rendering happens
//! here; delivery belongs to the external automation layer.

use crate::domain::models::AccountingNote;

pub fn accounting_note_created(
    note: &AccountingNote,
    project_name: &str,
    unit_code: &str,
    creator_name: &str,
) -> String {
    [
        "📌 ملاحظة محاسبية جديدة".to_string(),
        format!("رقم الملاحظة: {}", note.id),
        format!("التاريخ: {}", note.created_at.format("%Y-%m-%d")),
        format!("المشروع: {project_name}"),
        format!("الوحدة: {unit_code}"),
        format!("القيمة: {} ريال", format_amount(note.amount_cents)),
        format!("التفاصيل: {}", note.description),
        format!("أُنشئت بواسطة: {creator_name}"),
    ]
    .join("\n")
}

pub fn ticket_received(
    resident_name: &str,
    project_name: &str,
    unit_code: &str,
    description: &str,
) -> String {
    format!(
        "شكوى جديدة من الساكن {resident_name}\nفي المشروع {project_name}\nالوحدة {unit_code}\nالشكوى\n{description}"
    )
}

pub fn delivery_order_received(
    resident_name: &str,
    project_name: &str,
    unit_code: &str,
    order_text: &str,
) -> String {
    format!(
        "طلب توصيل جديد من الساكن {resident_name}\nفي المشروع {project_name}\nالوحدة {unit_code}\nتفاصيل الطلب\n{order_text}"
    )
}

fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
