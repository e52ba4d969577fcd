//! Signed, scannable ticket codes.
//!
//! A code is `base64url(payload) "." base64url(mac)` where the payload is
//! `ticket_number "." order_number "." revision` and the MAC is HMAC-SHA256
//! over the raw payload bytes. Bumping the revision invalidates older codes
//! for the same ticket.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors produced while signing or verifying codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("ticket code secret must not be empty")]
    InvalidKey,

    #[error("ticket code is malformed")]
    Malformed,

    #[error("ticket code signature does not match")]
    InvalidSignature,
}

/// What a code asserts about its ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeClaims {
    pub ticket_number: String,
    pub order_number: String,
    pub revision: u32,
}

impl CodeClaims {
    fn payload(&self) -> String {
        format!(
            "{}.{}.{}",
            self.ticket_number, self.order_number, self.revision
        )
    }

    fn parse(payload: &str) -> Result<Self, CodeError> {
        let mut parts = payload.splitn(3, '.');
        let (Some(ticket_number), Some(order_number), Some(revision)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodeError::Malformed);
        };
        if ticket_number.is_empty() || order_number.is_empty() {
            return Err(CodeError::Malformed);
        }
        let revision = revision.parse().map_err(|_| CodeError::Malformed)?;

        Ok(Self {
            ticket_number: ticket_number.to_string(),
            order_number: order_number.to_string(),
            revision,
        })
    }
}

/// Signs and verifies ticket codes with a shared secret.
#[derive(Clone)]
pub struct TicketCodeSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for TicketCodeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCodeSigner").finish_non_exhaustive()
    }
}

impl TicketCodeSigner {
    pub fn new(secret: &[u8]) -> Result<Self, CodeError> {
        if secret.is_empty() {
            return Err(CodeError::InvalidKey);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| CodeError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Produces the code for `claims`.
    pub fn sign(&self, claims: &CodeClaims) -> String {
        let payload = claims.payload();
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verifies a code and returns its claims.
    ///
    /// The MAC comparison is constant time.
    pub fn verify(&self, code: &str) -> Result<CodeClaims, CodeError> {
        let (payload, signature) = code.trim().split_once('.').ok_or(CodeError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CodeError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CodeError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| CodeError::InvalidSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| CodeError::Malformed)?;
        CodeClaims::parse(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> CodeClaims {
        CodeClaims {
            ticket_number: "TKT-0A1B2C3D4E5F".to_string(),
            order_number: "ORD-ABCDEF012345".to_string(),
            revision: 0,
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let signer = TicketCodeSigner::new(b"check-in-secret").unwrap();
        let code = signer.sign(&claims());
        assert!(!code.contains('='));
        assert_eq!(signer.verify(&code).unwrap(), claims());
    }

    #[test]
    fn test_other_secret_rejects() {
        let code = TicketCodeSigner::new(b"one").unwrap().sign(&claims());
        let other = TicketCodeSigner::new(b"two").unwrap();
        assert_eq!(other.verify(&code), Err(CodeError::InvalidSignature));
    }

    #[test]
    fn test_tampered_payload_rejects() {
        let signer = TicketCodeSigner::new(b"secret").unwrap();
        let code = signer.sign(&claims());
        let (_, signature) = code.split_once('.').unwrap();

        let mut forged = claims();
        forged.revision = 7;
        let forged_payload = URL_SAFE_NO_PAD.encode(forged.payload());
        let forged_code = format!("{forged_payload}.{signature}");

        assert_eq!(
            signer.verify(&forged_code),
            Err(CodeError::InvalidSignature)
        );
    }

    #[test]
    fn test_revision_changes_code() {
        let signer = TicketCodeSigner::new(b"secret").unwrap();
        let mut rotated = claims();
        rotated.revision = 1;
        assert_ne!(signer.sign(&claims()), signer.sign(&rotated));
    }

    #[test]
    fn test_malformed_codes() {
        let signer = TicketCodeSigner::new(b"secret").unwrap();
        assert_eq!(signer.verify("garbage"), Err(CodeError::Malformed));
        assert_eq!(signer.verify("!!.??"), Err(CodeError::Malformed));
        assert!(TicketCodeSigner::new(b"").is_err());
    }
}
