//! Identity handlers

use crate::api::rest::extract::bearer_token;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use dorm_core::{ResolveOutcome, ResolvedIdentity};
use dorm_storage::IdentityId;
use serde::{Deserialize, Serialize};

/// Provision identity request
#[derive(Debug, Default, Deserialize)]
pub struct ProvisionIdentityRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Resolve identity response
#[derive(Debug, Serialize)]
pub struct ResolveIdentityResponse {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub credential: String,
    pub outcome: ResolveOutcome,
}

/// Resolve the caller's identity from an optional bearer credential.
///
/// Never answers 401: an unusable credential yields a fresh identity.
pub async fn resolve_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ResolveIdentityResponse>> {
    let resolved = state.identities.resolve(bearer_token(&headers)).await?;
    Ok(Json(resolved.into()))
}

/// Provision a fresh identity, optionally with a chosen display name.
pub async fn provision_identity(
    State(state): State<AppState>,
    Json(req): Json<ProvisionIdentityRequest>,
) -> ApiResult<(StatusCode, Json<ResolveIdentityResponse>)> {
    let provisioned = state
        .identities
        .provision(req.display_name.as_deref())
        .await?;

    tracing::info!(
        identity_id = %provisioned.identity_id,
        display_name = %provisioned.display_name,
        "Provisioned identity on request"
    );

    Ok((StatusCode::CREATED, Json(provisioned.into())))
}

impl From<ResolvedIdentity> for ResolveIdentityResponse {
    fn from(resolved: ResolvedIdentity) -> Self {
        Self {
            identity_id: resolved.identity_id,
            display_name: resolved.display_name,
            credential: resolved.credential,
            outcome: resolved.outcome,
        }
    }
}
