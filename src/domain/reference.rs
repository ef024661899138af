use uuid::Uuid;

/// Human-facing references are derived from the row id so that retries and
/// concurrent creations never race over a counter.
pub fn invoice_number(id: Uuid) -> String {
    format!("INV-{}", hex_prefix(id, 12))
}

pub fn ticket_number(id: Uuid) -> String {
    format!("TICK-{}", hex_prefix(id, 8))
}

pub fn order_number(id: Uuid) -> String {
    format!("ORD-{}", hex_prefix(id, 8))
}

fn hex_prefix(id: Uuid, len: usize) -> String {
    id.simple()
        .to_string()
        .chars()
        .take(len)
        .collect::<String>()
        .to_ascii_uppercase()
}
