//! Processors driving the payment lifecycle.
//!
//! - `PaymentEngine`: validates and applies transitions, then notifies
//! - `BlockchainClient`: asks a blockchain micro-service for a deposit
//! - `WebhookDispatcher`: signs and posts state changes to merchants
//! - `serve_checkout`: drives one checkout page connection

pub mod blockchain_client;
pub mod checkout_session;
pub mod payment_engine;
pub mod webhook_sender;

pub use blockchain_client::{
    BlockchainClient, BlockchainClients, BlockchainError, HttpBlockchainClient,
};
pub use checkout_session::serve_checkout;
pub use payment_engine::{
    AppliedUpdate, Attached, CreateInvoice, CreatePayment, PaymentEngine, PaymentError,
    StateUpdate, UpdateOutcome,
};
pub use webhook_sender::{
    HttpWebhookTransport, WebhookDispatcher, WebhookError, WebhookTransport,
};

use crate::entities::CryptoCurrencyName;
use crate::utils::precision::{PrecisionError, PrecisionTable};
use num_bigint::BigUint;

/// Display form of an amount whose currency may not be chosen yet.
///
/// Without a currency only zero is meaningful, and any other amount is
/// shown as its raw integer.
pub(crate) fn display_amount(
    precision: &PrecisionTable,
    currency: Option<CryptoCurrencyName>,
    amount: &BigUint,
) -> Result<String, PrecisionError> {
    match currency {
        Some(currency) => precision.to_display(currency, amount),
        None => Ok(amount.to_string()),
    }
}
