//! Caller identity extracted from headers set by the upstream auth layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use checkout::Actor;
use common::{BuyerId, OrganizerId};
use domain::Buyer;

use crate::error::ApiError;

pub const BUYER_ID_HEADER: &str = "x-buyer-id";
pub const BUYER_NAME_HEADER: &str = "x-buyer-name";
pub const BUYER_EMAIL_HEADER: &str = "x-buyer-email";
pub const ORGANIZER_ID_HEADER: &str = "x-organizer-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn buyer_id(parts: &Parts) -> Result<Option<BuyerId>, ApiError> {
    header(parts, BUYER_ID_HEADER)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ApiError::Unauthorized(format!("invalid {BUYER_ID_HEADER} header")))
        })
        .transpose()
}

fn organizer_id(parts: &Parts) -> Result<Option<OrganizerId>, ApiError> {
    header(parts, ORGANIZER_ID_HEADER)
        .map(|raw| {
            raw.parse().map_err(|_| {
                ApiError::Unauthorized(format!("invalid {ORGANIZER_ID_HEADER} header"))
            })
        })
        .transpose()
}

/// The authenticated buyer.
#[derive(Debug, Clone)]
pub struct CurrentBuyer(pub Buyer);

impl<S: Send + Sync> FromRequestParts<S> for CurrentBuyer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = buyer_id(parts)?
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {BUYER_ID_HEADER} header")))?;
        let email = header(parts, BUYER_EMAIL_HEADER).ok_or_else(|| {
            ApiError::Unauthorized(format!("missing {BUYER_EMAIL_HEADER} header"))
        })?;
        let name = header(parts, BUYER_NAME_HEADER).unwrap_or(email);
        Ok(CurrentBuyer(Buyer::new(id, name, email)))
    }
}

/// The authenticated organizer.
#[derive(Debug, Clone, Copy)]
pub struct CurrentOrganizer(pub OrganizerId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentOrganizer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        organizer_id(parts)?.map(CurrentOrganizer).ok_or_else(|| {
            ApiError::Unauthorized(format!("missing {ORGANIZER_ID_HEADER} header"))
        })
    }
}

/// Either kind of caller; an organizer header wins when both are present.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(organizer) = organizer_id(parts)? {
            return Ok(Caller(Actor::Organizer(organizer)));
        }
        buyer_id(parts)?
            .map(|id| Caller(Actor::Buyer(id)))
            .ok_or_else(|| ApiError::Unauthorized("missing caller identity headers".into()))
    }
}

/// The `Idempotency-Key` header, if sent.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(IdempotencyKey(
            header(parts, IDEMPOTENCY_KEY_HEADER).map(str::to_string),
        ))
    }
}
