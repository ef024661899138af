use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const API_KEY_HEADER: &str = "x-api-key";

pub fn body_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// An unset secret never verifies; signatures are lowercase hex over the raw
/// request body.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(expected) = body_signature(secret, body) else {
        return false;
    };
    let provided = provided.trim().to_ascii_lowercase();
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

pub fn tokens_match(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    bool::from(expected.as_bytes().ct_eq(provided.trim().as_bytes()))
}
