//! Webhook signature verification.
//!
//! GitHub-style senders sign the raw request body using HMAC-SHA256 and put
//! the lowercase hex digest in the `X-Hub-Signature-256` header as
//! `sha256=<hex>`.
//!
//! An empty secret switches verification off entirely ("open mode"). This is
//! an intentional bypass for local and development deployments where no
//! secret has been configured on the sending side.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Prefix every signature header must carry.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook signature header against the raw payload.
///
/// # Arguments
///
/// * `payload` - The raw, unparsed request body
/// * `secret` - The shared webhook secret (empty means open mode)
/// * `signature_header` - The value of the `X-Hub-Signature-256` header
///
/// # Returns
///
/// `true` if the secret is empty, or if the header carries the lowercase hex
/// HMAC-SHA256 of `payload` keyed by `secret`. `false` otherwise.
pub fn verify_signature(payload: &[u8], secret: &str, signature_header: &str) -> bool {
    if !is_signature_verification_enabled(secret) {
        return true;
    }

    if signature_header.is_empty() {
        warn!("webhook_signature_missing");
        return false;
    }

    let provided = match signature_header.strip_prefix(SIGNATURE_PREFIX) {
        Some(hex_digest) => hex_digest,
        None => {
            warn!(header_length = signature_header.len(), "webhook_signature_bad_prefix");
            return false;
        }
    };

    // Only lowercase hex is accepted, which is what senders emit.
    if !is_lowercase_hex(provided) {
        warn!(header_length = signature_header.len(), "webhook_signature_not_lowercase_hex");
        return false;
    }

    let provided_bytes = match hex::decode(provided) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(header_length = signature_header.len(), "webhook_signature_invalid_hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };
    mac.update(payload);

    // Constant-time comparison via the HMAC library
    let valid = mac.verify_slice(&provided_bytes).is_ok();

    if !valid {
        warn!(actual_length = provided.len(), "webhook_signature_mismatch");
    }

    valid
}

/// Compute the lowercase hex HMAC-SHA256 digest of `payload`.
pub fn compute_signature(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length, so this never fails in practice.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Format a digest as a header value (`sha256=<hex>`).
pub fn format_signature_header(hex_digest: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex_digest)
}

fn is_lowercase_hex(value: &str) -> bool {
    value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Check if signature verification is enabled for the given secret.
pub fn is_signature_verification_enabled(secret: &str) -> bool {
    !secret.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_accepts_anything() {
        assert!(verify_signature(b"", "", ""));
        assert!(verify_signature(b"payload", "", "garbage"));
        assert!(verify_signature(b"payload", "", "sha256=deadbeef"));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(!verify_signature(b"payload", "secret", ""));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let digest = compute_signature(b"payload", "secret");
        assert!(!verify_signature(b"payload", "secret", &digest));
        assert!(!verify_signature(
            b"payload",
            "secret",
            &format!("sha1={}", digest)
        ));
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"ref":"refs/heads/main"}"#;
        let header = format_signature_header(&compute_signature(payload, "test-secret"));
        assert!(verify_signature(payload, "test-secret", &header));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"test payload";
        let header = format_signature_header(&compute_signature(payload, "correct-secret"));
        assert!(!verify_signature(payload, "wrong-secret", &header));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = format_signature_header(&compute_signature(b"original", "secret"));
        assert!(!verify_signature(b"tampered", "secret", &header));
    }

    #[test]
    fn test_uppercase_hex_rejected() {
        let payload = b"Hello, World!";
        let digest = compute_signature(payload, "It's a Secret to Everybody");
        let header = format_signature_header(&digest.to_uppercase());
        assert!(!verify_signature(payload, "It's a Secret to Everybody", &header));
    }

    #[test]
    fn test_deadbeef_rejected() {
        assert!(!verify_signature(b"{}", "secret", "sha256=deadbeef"));
    }

    #[test]
    fn test_compute_signature_known_vector() {
        // Published example for X-Hub-Signature-256 validation
        let digest = compute_signature(b"Hello, World!", "It's a Secret to Everybody");
        assert_eq!(
            digest,
            "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_compute_signature_is_deterministic() {
        let a = compute_signature(b"body", "key");
        let b = compute_signature(b"body", "key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let payload = b"payload";
        let digest = compute_signature(payload, "secret");

        assert!(!verify_signature(payload, "secret", "sha256="));
        assert!(!verify_signature(payload, "secret", "sha256=xyz"));
        assert!(!verify_signature(payload, "secret", &format!("sha256={}", &digest[1..])));
        assert!(!verify_signature(payload, "secret", &format!("sha256={}00", digest)));
    }

    #[test]
    fn test_is_lowercase_hex() {
        assert!(is_lowercase_hex("0123abcdef"));
        assert!(!is_lowercase_hex("ABCDEF"));
        assert!(!is_lowercase_hex("zz"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(""));
        assert!(is_signature_verification_enabled("key123"));
    }
}
