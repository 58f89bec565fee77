//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `ApiKeyAuth`: resolves the `X-API-KEY` header to a merchant through
//!   the API key vault (used by the public API).
//! - `InternalAuth`: checks the shared `X-Internal-Token` header when one
//!   is configured (used by the blockchain services).
//! - `ApiJson<T>`: a JSON body whose rejection is an [`ApiError`].

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use chaingate_core::entities::api_key::ApiKey;
use chaingate_core::entities::merchant::Merchant;
use chaingate_core::utils::constant_time_eq;
use chaingate_core::vault::Authenticated;
use serde::de::DeserializeOwned;

use crate::api::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

// ---------------------------------------------------------------------------
// ApiKeyAuth
// ---------------------------------------------------------------------------

/// The merchant and key behind a valid `X-API-KEY` header.
///
/// Missing, malformed, unknown and inactive keys are all rejected with the
/// same 401.
pub struct ApiKeyAuth {
    pub merchant: Merchant,
    pub api_key: ApiKey,
}

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let Authenticated { merchant, api_key } = state.vault.authenticate(presented).await?;
        tracing::debug!(merchant_id = %merchant.id, key_id = %api_key.id, "API key accepted");
        Ok(Self { merchant, api_key })
    }
}

// ---------------------------------------------------------------------------
// InternalAuth
// ---------------------------------------------------------------------------

/// Marker for requests that passed the internal token check.
pub struct InternalAuth;

impl FromRequestParts<AppState> for InternalAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.internal_token.as_deref() else {
            return Ok(Self);
        };
        let presented = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            tracing::warn!("Rejected internal request with a bad token");
            Err(ApiError::Unauthorized)
        }
    }
}

// ---------------------------------------------------------------------------
// ApiJson
// ---------------------------------------------------------------------------

/// `Json<T>` that answers malformed bodies with the API's error shape.
pub struct ApiJson<T>(pub T);

impl<T: DeserializeOwned> FromRequest<AppState> for ApiJson<T> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}
