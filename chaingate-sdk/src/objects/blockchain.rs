//! Contract with the per-currency blockchain payment micro-services.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::currency::{CryptoCurrency, FiatCurrency, Mode, PaymentState};

/// `POST {base}/payment` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainPaymentRequest {
    pub price_currency: FiatCurrency,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_amount: Decimal,
    /// Merchant deposit wallet the funds are forwarded to.
    pub wallet: String,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainPaymentResponse {
    pub payment_id: String,
    pub payment_state: PaymentState,
    pub pay_currency: CryptoCurrency,
    /// Integer string in the smallest unit.
    pub pay_amount: String,
    pub price_currency: FiatCurrency,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_amount: Decimal,
    pub pay_address: String,
}
