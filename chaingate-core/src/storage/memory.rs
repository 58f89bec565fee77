//! In-memory store used by unit tests.

use super::{MerchantStore, PaymentStore, StoreError};
use crate::entities::api_key::ApiKey;
use crate::entities::merchant::{Merchant, Wallet};
use crate::entities::payment::{NewPayment, Payment, PaymentStateRecord, PaymentUpdate};
use crate::entities::{ApiKeyTypeName, CryptoCurrencyName, ModeName, PaymentStateName};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    merchants: HashMap<Uuid, Merchant>,
    api_keys: HashMap<Uuid, ApiKey>,
    next_state_id: i64,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub(crate) async fn insert_merchant(&self, merchant: Merchant) {
        self.inner
            .lock()
            .await
            .merchants
            .insert(merchant.id, merchant);
    }

    pub(crate) async fn payment(&self, id: Uuid) -> Option<Payment> {
        self.inner.lock().await.payments.get(&id).cloned()
    }

    pub(crate) async fn api_key(&self, id: Uuid) -> Option<ApiKey> {
        self.inner.lock().await.api_keys.get(&id).cloned()
    }
}

/// A merchant owning one wallet per `(currency, mode, address)` entry.
pub(crate) fn merchant_with_wallets(
    wallets: &[(CryptoCurrencyName, ModeName, &str)],
) -> Merchant {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    Merchant {
        id,
        name: "Test Shop".to_string(),
        created_at: now,
        wallets: wallets
            .iter()
            .map(|(currency, mode, address)| Wallet {
                id: Uuid::new_v4(),
                merchant_id: id,
                currency: *currency,
                mode: *mode,
                address: (*address).to_string(),
                created_at: now,
            })
            .collect(),
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn find_payment_by_id(&self, id: Uuid) -> Result<Payment, StoreError> {
        self.payment(id).await.ok_or(StoreError::NotFound)
    }

    async fn find_payment_by_blockchain_id(
        &self,
        blockchain_payment_id: &str,
        pay_currency: CryptoCurrencyName,
    ) -> Result<Payment, StoreError> {
        self.inner
            .lock()
            .await
            .payments
            .values()
            .find(|p| {
                p.blockchain_payment_id.as_deref() == Some(blockchain_payment_id)
                    && p.pay_currency == Some(pay_currency)
            })
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.payments.contains_key(&payment.id) {
            return Err(StoreError::Conflict);
        }
        inner.next_state_id += 1;
        let now = OffsetDateTime::now_utc();
        let created = Payment {
            id: payment.id,
            merchant_id: payment.merchant_id,
            wallet_id: payment.wallet_id,
            mode: payment.mode,
            price_amount: payment.price_amount,
            price_currency: payment.price_currency,
            pay_currency: payment.pay_currency,
            blockchain_payment_id: payment.blockchain_payment_id,
            pay_address: payment.pay_address,
            callback_url: payment.callback_url,
            success_page_url: payment.success_page_url,
            failure_page_url: payment.failure_page_url,
            tx_hash: None,
            created_at: now,
            updated_at: now,
            history: vec![PaymentStateRecord {
                id: inner.next_state_id,
                payment_id: payment.id,
                state: payment.initial_state.state,
                pay_amount: payment.initial_state.pay_amount,
                actually_paid: payment.initial_state.actually_paid,
                created_at: now,
            }],
        };
        inner.payments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_payment(&self, update: PaymentUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_state_id += 1;
        let state_id = inner.next_state_id;
        let payment = inner
            .payments
            .get_mut(&update.payment_id)
            .ok_or(StoreError::NotFound)?;

        let state = update.new_state.state;
        if state != PaymentStateName::PartiallyPaid && payment.has_state(state) {
            return Err(StoreError::Conflict);
        }

        let now = OffsetDateTime::now_utc();
        if let Some(tx_hash) = update.tx_hash {
            payment.tx_hash = Some(tx_hash);
        }
        if let Some(assignment) = update.assignment {
            payment.wallet_id = Some(assignment.wallet_id);
            payment.pay_currency = Some(assignment.pay_currency);
            payment.blockchain_payment_id = Some(assignment.blockchain_payment_id);
            payment.pay_address = Some(assignment.pay_address);
        }
        payment.updated_at = now;
        payment.history.push(PaymentStateRecord {
            id: state_id,
            payment_id: update.payment_id,
            state,
            pay_amount: update.new_state.pay_amount,
            actually_paid: update.new_state.actually_paid,
            created_at: now,
        });
        Ok(())
    }

    async fn list_payments(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
    ) -> Result<Vec<Payment>, StoreError> {
        let inner = self.inner.lock().await;
        let mut payments: Vec<Payment> = inner
            .payments
            .values()
            .filter(|p| p.merchant_id == merchant_id && p.mode == mode)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}

#[async_trait]
impl MerchantStore for MemoryStore {
    async fn find_merchant_by_id(&self, id: Uuid) -> Result<Merchant, StoreError> {
        self.inner
            .lock()
            .await
            .merchants
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<ApiKey, StoreError> {
        self.api_key(id).await.ok_or(StoreError::NotFound)
    }

    async fn find_active_api_key(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
        key_type: ApiKeyTypeName,
    ) -> Result<ApiKey, StoreError> {
        self.inner
            .lock()
            .await
            .api_keys
            .values()
            .filter(|k| {
                k.merchant_id == merchant_id
                    && k.mode == mode
                    && k.key_type == key_type
                    && k.is_active
            })
            .max_by_key(|k| k.created_at)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.api_keys.contains_key(&key.id) {
            return Err(StoreError::Conflict);
        }
        inner.api_keys.insert(key.id, key);
        Ok(())
    }

    async fn deactivate_api_key(&self, id: Uuid, merchant_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.api_keys.get_mut(&id) {
            Some(key) if key.merchant_id == merchant_id => {
                key.is_active = false;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}
