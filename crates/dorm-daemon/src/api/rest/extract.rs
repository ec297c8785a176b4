//! Bearer credential extraction

use crate::api::rest::state::AppState;
use crate::error::ApiError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use dorm_storage::IdentityId;

/// Token from the `Authorization: Bearer` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
}

/// Token from an `Authorization` header value. Blank tokens count as absent.
fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticated caller. Rejects with 401 when the credential is missing or
/// does not verify. Verification is stateless.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: IdentityId,
    pub display_name: String,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer credential".to_string()))?;

        let claims = state.identities.authenticate(token).map_err(|err| {
            tracing::debug!(reason = %err, "bearer credential rejected");
            ApiError::Unauthorized("invalid or expired credential".to_string())
        })?;

        Ok(Caller {
            identity: claims.identity(),
            display_name: claims.display_name,
        })
    }
}
