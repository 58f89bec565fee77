//! Request and response bodies for the public and internal payment APIs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::currency::{CryptoCurrency, FiatCurrency, Mode, PaymentState};

/// `POST /api/public/payment` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub price_amount: Decimal,
    pub price_currency: FiatCurrency,
    pub pay_currency: CryptoCurrency,
    pub callback_url: Url,
    #[serde(default)]
    pub success_page_url: Option<Url>,
    #[serde(default)]
    pub failure_page_url: Option<Url>,
}

/// `POST /api/public/invoice` body.
///
/// Same as [`CreatePaymentRequest`] without a pay currency: the buyer
/// picks one on the checkout page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub price_amount: Decimal,
    pub price_currency: FiatCurrency,
    pub callback_url: Url,
    #[serde(default)]
    pub success_page_url: Option<Url>,
    #[serde(default)]
    pub failure_page_url: Option<Url>,
}

/// A payment as returned to the merchant.
///
/// Amounts are in display form (`"0.50000000"`), never smallest units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: Uuid,
    pub mode: Mode,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrency,
    pub pay_currency: Option<CryptoCurrency>,
    pub pay_address: Option<String>,
    pub pay_amount: String,
    pub actually_paid: String,
    pub state: PaymentState,
    pub tx_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One row of a payment's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryEntry {
    pub state: PaymentState,
    pub pay_amount: String,
    pub actually_paid: String,
    pub created_at: i64,
}

/// Entry of `GET /api/public/payments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLogEntry {
    #[serde(flatten)]
    pub payment: PaymentResponse,
    pub history: Vec<PaymentHistoryEntry>,
}

/// State update pushed by a blockchain micro-service.
///
/// `payAmount` and `actuallyPaid` are integer strings in the currency's
/// smallest unit (wei, satoshi).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateRequest {
    pub payment_id: String,
    pub pay_currency: CryptoCurrency,
    pub payment_state: PaymentState,
    pub pay_amount: String,
    pub actually_paid: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcomeKind {
    /// A new state row was persisted.
    Applied,
    /// The state was already recorded.
    Duplicate,
    /// The reported state cannot follow the current one.
    OutOfOrder,
    /// Expiry of a payment that was never persisted.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateResponse {
    pub outcome: UpdateOutcomeKind,
    /// Only set when `outcome` is `applied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_delivered: Option<bool>,
}
