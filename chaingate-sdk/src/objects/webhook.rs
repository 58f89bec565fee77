//! Webhook payload posted to the merchant callback URL on every state change.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::currency::{CryptoCurrency, FiatCurrency, PaymentState};
use crate::signature::{self, SignatureError};

/// The signed section of a webhook.
///
/// Field order is part of the signature: the HMAC is computed over the
/// JSON encoding of this struct as declared here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookData {
    pub payment_id: Uuid,
    pub pay_address: Option<String>,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrency,
    /// Display form, e.g. `"1.00000000"`.
    pub pay_amount: String,
    pub pay_currency: Option<CryptoCurrency>,
    /// Display form, e.g. `"0.50000000"`.
    pub actually_paid: String,
    pub payment_state: PaymentState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Body of the webhook POST: `{ data, signature }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookBody {
    pub data: WebhookData,
    /// `hex(HMAC-SHA512(secret, JSON(data)))`.
    pub signature: String,
}

impl WebhookBody {
    /// Sign `data` with the merchant secret.
    pub fn sign(data: WebhookData, secret: &[u8]) -> Result<Self, SignatureError> {
        let json = serde_json::to_string(&data)?;
        let signature = signature::sign_hex(json.as_bytes(), secret);
        Ok(Self { data, signature })
    }

    /// Verify the signature against the re-encoded `data`.
    ///
    /// Receivers holding the raw request body should prefer
    /// [`signature::verify_raw_webhook`], which does not depend on
    /// re-encoding.
    pub fn verify(&self, secret: &[u8]) -> Result<(), SignatureError> {
        let json = serde_json::to_string(&self.data)?;
        signature::verify_hex(json.as_bytes(), &self.signature, secret)
    }
}
