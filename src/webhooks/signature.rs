//! HMAC-SHA256 signing of outbound hook deliveries.
//!
//! Each delivery to an endpoint with a secret carries
//! `X-Merge-Readiness-Signature: sha256=<hex>` computed over the exact body
//! bytes. Subscribers recompute it with the shared secret; [`verify_signature`]
//! is that check, used here by tests and available to Rust subscribers.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "X-Merge-Readiness-Signature";

const PREFIX: &str = "sha256=";

/// Raw HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a header value, `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", PREFIX, hex::encode(signature))
}

/// Header value to send with `payload`.
///
/// ```
/// use merge_readiness::webhooks::{sign_payload, verify_signature};
///
/// let header = sign_payload(b"{}", b"s3cret");
/// assert!(header.starts_with("sha256="));
/// assert!(verify_signature(b"{}", &header, b"s3cret"));
/// ```
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(payload, secret))
}

/// Decodes a `sha256=<hex>` header. `None` for anything malformed.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix(PREFIX)?).ok()
}

/// Checks `signature_header` against `payload` in constant time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
