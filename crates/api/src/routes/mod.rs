//! HTTP route handlers.

pub mod catalog;
pub mod ops;
pub mod orders;
pub mod payments;
pub mod tickets;

use axum::body::Bytes;
use serde::Deserialize;

use crate::error::ApiError;

/// Optional `{ "reason": ... }` body of cancel and refund requests.
#[derive(Debug, Default, Deserialize)]
struct ReasonBody {
    #[serde(default)]
    reason: Option<String>,
}

/// Reads an optional reason from a possibly empty JSON body.
fn optional_reason(body: &Bytes) -> Result<Option<String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: ReasonBody = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
    Ok(parsed.reason.filter(|r| !r.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_reason() {
        assert_eq!(optional_reason(&Bytes::new()).unwrap(), None);
        assert_eq!(
            optional_reason(&Bytes::from_static(br#"{"reason":"double booked"}"#)).unwrap(),
            Some("double booked".to_string())
        );
        assert_eq!(optional_reason(&Bytes::from_static(b"{}")).unwrap(), None);
        assert!(optional_reason(&Bytes::from_static(b"not json")).is_err());
    }
}
