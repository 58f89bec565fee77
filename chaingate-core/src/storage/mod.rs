//! Persistence seams used by the engine and the vault.
//!
//! [`PaymentStore`] and [`MerchantStore`] are the only operations the
//! core needs from storage. [`DatabaseProcessor`] implements both on top
//! of the query processors in [`crate::entities`].

#[cfg(test)]
pub(crate) mod memory;

use crate::entities::api_key::{
    ApiKey, DeactivateApiKey, GetActiveApiKey, GetApiKeyById, InsertApiKey,
};
use crate::entities::merchant::{GetMerchantById, Merchant};
use crate::entities::payment::{
    AppendPaymentState, GetPaymentByBlockchainId, GetPaymentById, InsertPayment,
    ListPaymentsByMerchant, NewPayment, Payment, PaymentUpdate,
};
use crate::entities::{ApiKeyTypeName, CryptoCurrencyName, ModeName};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the storage seams.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflicting record")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(err),
        }
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_payment_by_id(&self, id: Uuid) -> Result<Payment, StoreError>;

    async fn find_payment_by_blockchain_id(
        &self,
        blockchain_payment_id: &str,
        pay_currency: CryptoCurrencyName,
    ) -> Result<Payment, StoreError>;

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    /// Append a state row, keeping all earlier rows.
    ///
    /// Fails with [`StoreError::Conflict`] when a concurrent writer already
    /// recorded the same non-repeatable state.
    async fn update_payment(&self, update: PaymentUpdate) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_payments(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
    ) -> Result<Vec<Payment>, StoreError>;
}

#[async_trait]
pub trait MerchantStore: Send + Sync {
    /// Includes the merchant's wallets.
    async fn find_merchant_by_id(&self, id: Uuid) -> Result<Merchant, StoreError>;

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<ApiKey, StoreError>;

    async fn find_active_api_key(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
        key_type: ApiKeyTypeName,
    ) -> Result<ApiKey, StoreError>;

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), StoreError>;

    async fn deactivate_api_key(&self, id: Uuid, merchant_id: Uuid) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

#[async_trait]
impl PaymentStore for DatabaseProcessor {
    async fn find_payment_by_id(&self, id: Uuid) -> Result<Payment, StoreError> {
        self.process(GetPaymentById { id })
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_payment_by_blockchain_id(
        &self,
        blockchain_payment_id: &str,
        pay_currency: CryptoCurrencyName,
    ) -> Result<Payment, StoreError> {
        self.process(GetPaymentByBlockchainId {
            blockchain_payment_id: blockchain_payment_id.to_owned(),
            pay_currency,
        })
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        Ok(self.process(InsertPayment { payment }).await?)
    }

    async fn update_payment(&self, update: PaymentUpdate) -> Result<(), StoreError> {
        Ok(self.process(AppendPaymentState { update }).await?)
    }

    async fn list_payments(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .process(ListPaymentsByMerchant { merchant_id, mode })
            .await?)
    }
}

#[async_trait]
impl MerchantStore for DatabaseProcessor {
    async fn find_merchant_by_id(&self, id: Uuid) -> Result<Merchant, StoreError> {
        self.process(GetMerchantById { id })
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<ApiKey, StoreError> {
        self.process(GetApiKeyById { id })
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_active_api_key(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
        key_type: ApiKeyTypeName,
    ) -> Result<ApiKey, StoreError> {
        self.process(GetActiveApiKey {
            merchant_id,
            mode,
            key_type,
        })
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        Ok(self.process(InsertApiKey { key }).await?)
    }

    async fn deactivate_api_key(&self, id: Uuid, merchant_id: Uuid) -> Result<(), StoreError> {
        if self
            .process(DeactivateApiKey { id, merchant_id })
            .await?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}
