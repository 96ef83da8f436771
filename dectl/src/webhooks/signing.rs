//! HMAC-SHA256 signing for outbound webhooks.
//!
//! The signature is the hex digest of HMAC-SHA256 over the exact payload
//! bytes, keyed by the subscription's shared secret, and travels in the
//! `X-DE-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header on outbound webhook POSTs.
pub const SIGNATURE_HEADER: &str = "X-DE-Signature";

/// Compute the hex HMAC-SHA256 signature of a payload.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received signature against a payload.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    match hex::decode(signature) {
        Ok(bytes) => mac.verify_slice(&bytes).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_sha256_sized() {
        let signature = sign("s3cr3t", b"{\"hello\":true}");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic_and_keyed() {
        let payload = b"payload bytes";
        assert_eq!(sign("s3cr3t", payload), sign("s3cr3t", payload));
        assert_ne!(sign("s3cr3t", payload), sign("other", payload));
        assert_ne!(sign("s3cr3t", payload), sign("s3cr3t", b"different"));
    }

    #[test]
    fn verify_round_trips() {
        let payload = b"{\"event\":\"request.completed\"}";
        let signature = sign("s3cr3t", payload);
        assert!(verify("s3cr3t", payload, &signature));
        assert!(!verify("wrong", payload, &signature));
        assert!(!verify("s3cr3t", payload, "not-hex"));
    }
}
