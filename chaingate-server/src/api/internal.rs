//! Internal API called by the blockchain services.
//!
//! # Endpoints
//!
//! - `POST /payment/webhook` – report a payment state change

use axum::{Json, Router, extract::State, routing::post};
use chaingate_core::processors::{StateUpdate, UpdateOutcome};
use chaingate_sdk::objects::{StateUpdateRequest, StateUpdateResponse};
use num_bigint::BigUint;

use crate::api::ApiError;
use crate::api::extractors::{ApiJson, InternalAuth};
use crate::state::AppState;

/// Build the internal API router.
pub fn router() -> Router<AppState> {
    Router::new().route("/payment/webhook", post(payment_webhook))
}

/// `POST /payment/webhook`: apply a reported state.
///
/// Duplicates, out-of-order reports and expiry of unknown payments are
/// acknowledged with 200 so the reporting service does not retry them.
async fn payment_webhook(
    State(state): State<AppState>,
    _auth: InternalAuth,
    ApiJson(body): ApiJson<StateUpdateRequest>,
) -> Result<Json<StateUpdateResponse>, ApiError> {
    let update = StateUpdate {
        pay_amount: parse_amount("payAmount", &body.pay_amount)?,
        actually_paid: parse_amount("actuallyPaid", &body.actually_paid)?,
        blockchain_payment_id: body.payment_id,
        pay_currency: body.pay_currency.into(),
        state: body.payment_state.into(),
        tx_hash: body.tx_hash.filter(|hash| !hash.is_empty()),
    };

    let outcome = state.engine.apply_update(update).await?;
    let webhook_delivered = match &outcome {
        UpdateOutcome::Applied(applied) => Some(applied.webhook.is_ok()),
        _ => None,
    };
    Ok(Json(StateUpdateResponse {
        outcome: outcome.kind(),
        webhook_delivered,
    }))
}

/// Amounts arrive as integer strings in the currency's smallest unit.
fn parse_amount(field: &str, value: &str) -> Result<BigUint, ApiError> {
    value
        .trim()
        .parse::<BigUint>()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a non-negative integer")))
}
