//! Public merchant API.
//!
//! # Endpoints
//!
//! - `POST /payment`  – create a payment in a chosen crypto currency
//! - `POST /invoice`  – create a payment the buyer picks a currency for
//! - `GET  /payments` – list payments with their state history (secret key only)
//!
//! The payment's mode is the mode of the API key that created it.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chaingate_core::entities::ApiKeyTypeName;
use chaingate_core::processors::{CreateInvoice, CreatePayment};
use chaingate_sdk::objects::{CreateInvoiceRequest, CreatePaymentRequest, PaymentLogEntry};

use crate::api::ApiError;
use crate::api::extractors::{ApiJson, ApiKeyAuth};
use crate::state::AppState;

/// Build the public API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment", post(create_payment))
        .route("/invoice", post(create_invoice))
        .route("/payments", get(list_payments))
}

/// `POST /payment`: create a payment and its deposit address.
async fn create_payment(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    ApiJson(body): ApiJson<CreatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .engine
        .create_payment(
            &auth.merchant,
            CreatePayment {
                mode: auth.api_key.mode,
                price_amount: body.price_amount,
                price_currency: body.price_currency.into(),
                pay_currency: body.pay_currency.into(),
                callback_url: body.callback_url.into(),
                success_page_url: body.success_page_url.map(Into::into),
                failure_page_url: body.failure_page_url.map(Into::into),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(state.engine.payment_response(&payment)?),
    ))
}

/// `POST /invoice`: create a payment that starts in currency selection.
async fn create_invoice(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    ApiJson(body): ApiJson<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .engine
        .create_invoice(
            &auth.merchant,
            CreateInvoice {
                mode: auth.api_key.mode,
                price_amount: body.price_amount,
                price_currency: body.price_currency.into(),
                callback_url: body.callback_url.into(),
                success_page_url: body.success_page_url.map(Into::into),
                failure_page_url: body.failure_page_url.map(Into::into),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(state.engine.payment_response(&payment)?),
    ))
}

/// `GET /payments`: the merchant's payments in the key's mode.
async fn list_payments(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<Json<Vec<PaymentLogEntry>>, ApiError> {
    if auth.api_key.key_type != ApiKeyTypeName::Secret {
        tracing::warn!(key_id = %auth.api_key.id, "Payment log requested with a public key");
        return Err(ApiError::Unauthorized);
    }
    let entries = state
        .engine
        .list_payments(auth.merchant.id, auth.api_key.mode)
        .await?;
    Ok(Json(entries))
}
