/// Saudi numbers reach us in several spellings for the same line:
/// `+9665XXXXXXXX`, `9665XXXXXXXX`, `009665XXXXXXXX`, `05XXXXXXXX` and the
/// bare `5XXXXXXXX`. Directory rows carry whichever form was entered, so
/// lookups run against the whole variant set instead of one normalization.
pub fn phone_variants(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let mut variants: Vec<String> = Vec::new();
    if trimmed.is_empty() {
        return variants;
    }
    push_unique(&mut variants, trimmed.to_string());

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return variants;
    }
    push_unique(&mut variants, digits.clone());

    let mut local = digits.as_str();
    if let Some(rest) = local.strip_prefix("00966") {
        local = rest;
    } else if let Some(rest) = local.strip_prefix("966") {
        local = rest;
    }
    if let Some(rest) = local.strip_prefix('0') {
        local = rest;
    }
    if local.is_empty() {
        return variants;
    }

    push_unique(&mut variants, local.to_string());
    push_unique(&mut variants, format!("0{local}"));
    push_unique(&mut variants, format!("966{local}"));
    push_unique(&mut variants, format!("+966{local}"));
    push_unique(&mut variants, format!("00966{local}"));
    variants
}

fn push_unique(variants: &mut Vec<String>, candidate: String) {
    if !variants.iter().any(|existing| existing == &candidate) {
        variants.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_form_expands_to_every_spelling() {
        let variants = phone_variants("+966 50 123 4567");
        for expected in [
            "501234567",
            "0501234567",
            "966501234567",
            "+966501234567",
            "00966501234567",
        ] {
            assert!(variants.iter().any(|v| v == expected), "missing {expected}");
        }
    }

    #[test]
    fn local_form_expands_to_international_spellings() {
        let variants = phone_variants("0501234567");
        assert!(variants.iter().any(|v| v == "+966501234567"));
        assert!(variants.iter().any(|v| v == "501234567"));
    }

    #[test]
    fn variants_are_unique() {
        let variants = phone_variants("501234567");
        let unique: std::collections::HashSet<&String> = variants.iter().collect();
        assert_eq!(variants.len(), unique.len());
    }

    #[test]
    fn blank_input_produces_nothing() {
        assert!(phone_variants("   ").is_empty());
        assert!(phone_variants("").is_empty());
    }
}
