//! Gateway callback authentication.
//!
//! Callbacks are signed with a hex HMAC-SHA512 of the raw body. Only the
//! reference is taken from the body; the outcome is re-read from the gateway.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Hex HMAC-SHA512 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks `signature` against `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    data: CallbackData,
}

#[derive(Debug, Deserialize)]
struct CallbackData {
    reference: String,
}

/// Pulls `data.reference` out of a callback body.
pub fn extract_reference(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<CallbackBody>(body)
        .ok()
        .map(|body| body.data.reference)
        .filter(|reference| !reference.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"ORD-0A1B2C3D4E5F-1","status":"success"}}"#;

    #[test]
    fn test_sign_and_verify() {
        let signature = sign("whsec", BODY);
        assert_eq!(signature.len(), 128);
        assert!(verify_signature("whsec", BODY, &signature));
        assert!(verify_signature("whsec", BODY, &signature.to_uppercase()));
    }

    #[test]
    fn test_rejects_wrong_secret_or_body() {
        let signature = sign("whsec", BODY);
        assert!(!verify_signature("other", BODY, &signature));
        assert!(!verify_signature("whsec", b"{}", &signature));
        assert!(!verify_signature("whsec", BODY, "not-hex"));
    }

    #[test]
    fn test_extract_reference() {
        assert_eq!(
            extract_reference(BODY).as_deref(),
            Some("ORD-0A1B2C3D4E5F-1")
        );
        assert_eq!(extract_reference(b"{\"data\":{}}"), None);
        assert_eq!(extract_reference(b"garbage"), None);
    }
}
