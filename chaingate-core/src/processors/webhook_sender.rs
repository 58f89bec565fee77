//! WebhookDispatcher.
//!
//! The WebhookDispatcher is responsible for:
//! - Building the canonical `data` section for a payment state change
//! - Converting on-chain amounts to display form
//! - Signing it with the merchant's secret for the payment's mode
//! - POSTing `{data, signature}` to the payment's callback URL
//!
//! Delivery is attempted once. Failures are returned to the caller and
//! never retried.

use crate::entities::payment::{Payment, PaymentStateRecord};
use crate::processors::display_amount;
use crate::utils::precision::{PrecisionError, PrecisionTable};
use crate::vault::{ApiKeyVault, VaultError};
use async_trait::async_trait;
use chaingate_sdk::objects::{WebhookBody, WebhookData};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The merchant's signing secret could not be resolved or decrypted.
    #[error("webhook secret unavailable: {0}")]
    SecretUnavailable(#[from] VaultError),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response from the merchant.
    #[error("webhook delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },

    #[error("payload serialization error: {0}")]
    Serialization(String),

    #[error("amount conversion error: {0}")]
    Precision(#[from] PrecisionError),
}

/// Sends a serialized webhook body to a callback URL.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, body: String) -> Result<(), WebhookError>;
}

pub struct HttpWebhookTransport {
    http_client: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, url: &str, body: String) -> Result<(), WebhookError> {
        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

pub struct WebhookDispatcher {
    vault: Arc<ApiKeyVault>,
    transport: Arc<dyn WebhookTransport>,
    precision: Arc<PrecisionTable>,
}

impl WebhookDispatcher {
    pub fn new(
        vault: Arc<ApiKeyVault>,
        transport: Arc<dyn WebhookTransport>,
        precision: Arc<PrecisionTable>,
    ) -> Self {
        Self {
            vault,
            transport,
            precision,
        }
    }

    /// The unsigned `data` section for `state` of `payment`.
    pub fn build_data(
        &self,
        payment: &Payment,
        state: &PaymentStateRecord,
    ) -> Result<WebhookData, WebhookError> {
        Ok(WebhookData {
            payment_id: payment.id,
            pay_address: payment.pay_address.clone(),
            price_amount: payment.price_amount,
            price_currency: payment.price_currency.into(),
            pay_amount: display_amount(&self.precision, payment.pay_currency, &state.pay_amount)?,
            pay_currency: payment.pay_currency.map(Into::into),
            actually_paid: display_amount(
                &self.precision,
                payment.pay_currency,
                &state.actually_paid,
            )?,
            payment_state: state.state.into(),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        })
    }

    /// Sign and POST one state change.
    pub async fn deliver(
        &self,
        payment: &Payment,
        state: &PaymentStateRecord,
    ) -> Result<(), WebhookError> {
        let result = self.try_deliver(payment, state).await;
        match &result {
            Ok(()) => info!(
                payment_id = %payment.id,
                state = %state.state,
                "Webhook delivered"
            ),
            Err(e) => warn!(
                payment_id = %payment.id,
                state = %state.state,
                error = %e,
                "Webhook delivery failed"
            ),
        }
        result
    }

    async fn try_deliver(
        &self,
        payment: &Payment,
        state: &PaymentStateRecord,
    ) -> Result<(), WebhookError> {
        let data = self.build_data(payment, state)?;
        let secret = self
            .vault
            .resolve_webhook_secret(payment.merchant_id, payment.mode)
            .await?;
        let body = WebhookBody::sign(data, secret.as_bytes())
            .map_err(|e| WebhookError::Serialization(e.to_string()))?;
        let json = serde_json::to_string(&body)
            .map_err(|e| WebhookError::Serialization(e.to_string()))?;
        self.transport.post(&payment.callback_url, json).await
    }
}
