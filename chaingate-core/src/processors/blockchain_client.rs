//! Client for the per-currency blockchain payment micro-services.
//!
//! Each supported currency is served by its own micro-service which hands
//! out a deposit address and the amount to pay. The gateway never talks
//! to a chain directly.

use crate::entities::CryptoCurrencyName;
use async_trait::async_trait;
use chaingate_sdk::objects::blockchain::{BlockchainPaymentRequest, BlockchainPaymentResponse};
use chaingate_sdk::objects::CryptoCurrency;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("price amount is too low for {0}")]
    AmountTooLow(CryptoCurrency),

    #[error("blockchain service rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid blockchain service response: {0}")]
    InvalidResponse(String),

    #[error("no blockchain service configured for {0}")]
    Unsupported(CryptoCurrency),
}

#[async_trait]
pub trait BlockchainClient: Send + Sync {
    async fn create_payment(
        &self,
        request: &BlockchainPaymentRequest,
    ) -> Result<BlockchainPaymentResponse, BlockchainError>;
}

/// `POST {base}/payment` over HTTP.
pub struct HttpBlockchainClient {
    currency: CryptoCurrency,
    endpoint: Url,
    http_client: reqwest::Client,
}

impl HttpBlockchainClient {
    pub fn new(
        currency: CryptoCurrency,
        base_url: &Url,
        timeout: Duration,
    ) -> Result<Self, BlockchainError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("payment").map_err(|e| {
            BlockchainError::InvalidResponse(format!("bad base url {base_url}: {e}"))
        })?;
        Ok(Self {
            currency,
            endpoint,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }
}

#[async_trait]
impl BlockchainClient for HttpBlockchainClient {
    #[tracing::instrument(skip_all, err, fields(currency = %self.currency))]
    async fn create_payment(
        &self,
        request: &BlockchainPaymentRequest,
    ) -> Result<BlockchainPaymentResponse, BlockchainError> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: BlockchainPaymentResponse = response
                .json()
                .await
                .map_err(|e| BlockchainError::InvalidResponse(e.to_string()))?;
            if body.pay_currency != self.currency {
                return Err(BlockchainError::InvalidResponse(format!(
                    "expected {} payment, got {}",
                    self.currency, body.pay_currency
                )));
            }
            return Ok(body);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST && body.to_lowercase().contains("too low") {
            return Err(BlockchainError::AmountTooLow(self.currency));
        }
        Err(BlockchainError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// One client per supported currency.
#[derive(Clone, Default)]
pub struct BlockchainClients {
    clients: HashMap<CryptoCurrencyName, Arc<dyn BlockchainClient>>,
}

impl BlockchainClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, currency: CryptoCurrencyName, client: Arc<dyn BlockchainClient>) -> Self {
        self.clients.insert(currency, client);
        self
    }

    pub fn get(
        &self,
        currency: CryptoCurrencyName,
    ) -> Result<&Arc<dyn BlockchainClient>, BlockchainError> {
        self.clients
            .get(&currency)
            .ok_or(BlockchainError::Unsupported(currency.into()))
    }

    pub fn supports(&self, currency: CryptoCurrencyName) -> bool {
        self.clients.contains_key(&currency)
    }
}
