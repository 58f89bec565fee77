//! PaymentEngine.
//!
//! The PaymentEngine is responsible for:
//! - Creating payments (with a pay currency) and invoices (without one)
//! - Validating and appending state updates reported by the blockchain
//!   services, idempotently by state value
//! - Assigning a currency chosen by the buyer on the checkout page
//! - Replaying the current state to newly connected checkout pages
//! - Notifying the hub and then the merchant webhook after every accepted
//!   transition
//!
//! Transitions of one payment are serialized by a per-payment lock held
//! from the duplicate check until notification has finished, so browsers
//! and merchants observe changes in the order they were persisted.

use crate::config::EngineConfig;
use crate::entities::merchant::Merchant;
use crate::entities::payment::{
    NewPayment, NewPaymentState, PayAssignment, Payment, PaymentStateRecord, PaymentUpdate,
};
use crate::entities::{CryptoCurrencyName, FiatCurrencyName, ModeName, PaymentStateName};
use crate::hub::{BoxedSink, BroadcastReport, ClientId, Hub, HubError, HubRegistry};
use crate::processors::blockchain_client::{BlockchainClients, BlockchainError};
use crate::processors::display_amount;
use crate::processors::webhook_sender::{WebhookDispatcher, WebhookError};
use crate::storage::{MerchantStore, PaymentStore, StoreError};
use crate::utils::precision::{PrecisionError, PrecisionTable};
use chaingate_sdk::objects::blockchain::BlockchainPaymentRequest;
use chaingate_sdk::objects::ws::{PaymentSnapshot, WsCloseCode, WsEnvelope, WsServerMessage};
use chaingate_sdk::objects::{
    CurrencyDetail, PaymentHistoryEntry, PaymentLogEntry, PaymentResponse, UpdateOutcomeKind,
};
use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("payment not found")]
    NotFound,

    #[error("upstream error: {0}")]
    Upstream(#[from] BlockchainError),

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("amount conversion error: {0}")]
    Precision(#[from] PrecisionError),

    #[error("notification error: {0}")]
    Hub(#[from] HubError),

    #[error("payment {0} has no state history")]
    EmptyHistory(Uuid),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => PaymentError::NotFound,
            other => PaymentError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePayment {
    pub mode: ModeName,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrencyName,
    pub pay_currency: CryptoCurrencyName,
    pub callback_url: String,
    pub success_page_url: Option<String>,
    pub failure_page_url: Option<String>,
}

/// A payment whose currency is chosen later by the buyer.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateInvoice {
    pub mode: ModeName,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrencyName,
    pub callback_url: String,
    pub success_page_url: Option<String>,
    pub failure_page_url: Option<String>,
}

/// A state change reported by a blockchain service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub blockchain_payment_id: String,
    pub pay_currency: CryptoCurrencyName,
    pub state: PaymentStateName,
    pub pay_amount: BigUint,
    pub actually_paid: BigUint,
    pub tx_hash: Option<String>,
}

/// A persisted transition and what came of its side effects.
#[derive(Debug)]
pub struct AppliedUpdate {
    /// Re-read after the write.
    pub payment: Payment,
    /// `None` when no checkout page is connected.
    pub broadcast: Option<BroadcastReport>,
    pub webhook: Result<(), WebhookError>,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Applied(Box<AppliedUpdate>),
    /// The state is already in the history.
    Duplicate,
    /// The state cannot follow `current`.
    OutOfOrder { current: PaymentStateName },
    /// Expiry reported for a payment that does not exist.
    Discarded,
}

impl UpdateOutcome {
    pub fn kind(&self) -> UpdateOutcomeKind {
        match self {
            UpdateOutcome::Applied(_) => UpdateOutcomeKind::Applied,
            UpdateOutcome::Duplicate => UpdateOutcomeKind::Duplicate,
            UpdateOutcome::OutOfOrder { .. } => UpdateOutcomeKind::OutOfOrder,
            UpdateOutcome::Discarded => UpdateOutcomeKind::Discarded,
        }
    }
}

/// A checkout page registered with its payment's hub.
pub struct Attached {
    pub hub: Hub,
    pub client_id: ClientId,
    pub state: PaymentStateName,
    /// Set while the payment awaits a currency selection.
    pub selection_deadline: Option<tokio::time::Instant>,
}

/// Deposit handed out by a blockchain service.
struct Deposit {
    state: PaymentStateName,
    wallet_id: Uuid,
    blockchain_payment_id: String,
    pay_address: String,
    pay_amount: BigUint,
}

// ---------------------------------------------------------------------------
// PaymentEngine
// ---------------------------------------------------------------------------

pub struct PaymentEngine {
    payments: Arc<dyn PaymentStore>,
    merchants: Arc<dyn MerchantStore>,
    blockchains: BlockchainClients,
    hubs: Arc<HubRegistry>,
    webhooks: WebhookDispatcher,
    precision: Arc<PrecisionTable>,
    config: EngineConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PaymentEngine {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        merchants: Arc<dyn MerchantStore>,
        blockchains: BlockchainClients,
        hubs: Arc<HubRegistry>,
        webhooks: WebhookDispatcher,
        precision: Arc<PrecisionTable>,
        config: EngineConfig,
    ) -> Self {
        Self {
            payments,
            merchants,
            blockchains,
            hubs,
            webhooks,
            precision,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn lock_payment(&self, payment_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(payment_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(merchant_id = %merchant.id, currency = ?request.pay_currency))]
    pub async fn create_payment(
        &self,
        merchant: &Merchant,
        request: CreatePayment,
    ) -> Result<Payment, PaymentError> {
        validate_price(request.price_amount)?;
        let deposit = self
            .request_deposit(
                merchant,
                request.mode,
                request.pay_currency,
                request.price_amount,
                request.price_currency,
            )
            .await?;

        let payment = self
            .payments
            .create_payment(NewPayment {
                id: Uuid::new_v4(),
                merchant_id: merchant.id,
                wallet_id: Some(deposit.wallet_id),
                mode: request.mode,
                price_amount: request.price_amount,
                price_currency: request.price_currency,
                pay_currency: Some(request.pay_currency),
                blockchain_payment_id: Some(deposit.blockchain_payment_id),
                pay_address: Some(deposit.pay_address),
                callback_url: request.callback_url,
                success_page_url: request.success_page_url,
                failure_page_url: request.failure_page_url,
                initial_state: NewPaymentState {
                    state: deposit.state,
                    pay_amount: deposit.pay_amount,
                    actually_paid: BigUint::ZERO,
                },
            })
            .await?;

        info!(payment_id = %payment.id, state = %deposit.state, "Payment created");
        Ok(payment)
    }

    #[tracing::instrument(skip_all, fields(merchant_id = %merchant.id))]
    pub async fn create_invoice(
        &self,
        merchant: &Merchant,
        request: CreateInvoice,
    ) -> Result<Payment, PaymentError> {
        validate_price(request.price_amount)?;
        if !merchant.has_wallet_in(request.mode) {
            return Err(PaymentError::Validation(format!(
                "merchant has no wallet in {:?} mode",
                request.mode
            )));
        }

        let payment = self
            .payments
            .create_payment(NewPayment {
                id: Uuid::new_v4(),
                merchant_id: merchant.id,
                wallet_id: None,
                mode: request.mode,
                price_amount: request.price_amount,
                price_currency: request.price_currency,
                pay_currency: None,
                blockchain_payment_id: None,
                pay_address: None,
                callback_url: request.callback_url,
                success_page_url: request.success_page_url,
                failure_page_url: request.failure_page_url,
                initial_state: NewPaymentState {
                    state: PaymentStateName::CurrencySelection,
                    pay_amount: BigUint::ZERO,
                    actually_paid: BigUint::ZERO,
                },
            })
            .await?;

        info!(payment_id = %payment.id, "Invoice created");
        Ok(payment)
    }

    async fn request_deposit(
        &self,
        merchant: &Merchant,
        mode: ModeName,
        currency: CryptoCurrencyName,
        price_amount: Decimal,
        price_currency: FiatCurrencyName,
    ) -> Result<Deposit, PaymentError> {
        let wallet = merchant.wallet_for(currency, mode).ok_or_else(|| {
            PaymentError::Validation(format!(
                "merchant has no {currency:?} wallet in {mode:?} mode"
            ))
        })?;
        let client = self.blockchains.get(currency).map_err(|e| match e {
            BlockchainError::Unsupported(c) => {
                PaymentError::Validation(format!("{c} payments are not supported"))
            }
            other => PaymentError::Upstream(other),
        })?;

        let response = client
            .create_payment(&BlockchainPaymentRequest {
                price_currency: price_currency.into(),
                price_amount,
                wallet: wallet.address.clone(),
                mode: mode.into(),
            })
            .await?;
        let pay_amount = response.pay_amount.parse::<BigUint>().map_err(|_| {
            BlockchainError::InvalidResponse(format!(
                "invalid pay amount {:?}",
                response.pay_amount
            ))
        })?;

        Ok(Deposit {
            state: response.payment_state.into(),
            wallet_id: wallet.id,
            blockchain_payment_id: response.payment_id,
            pay_address: response.pay_address,
            pay_amount,
        })
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Apply a state change pushed by a blockchain service.
    #[tracing::instrument(skip_all, fields(blockchain_payment_id = %update.blockchain_payment_id, state = %update.state))]
    pub async fn apply_update(&self, update: StateUpdate) -> Result<UpdateOutcome, PaymentError> {
        let found = match self
            .payments
            .find_payment_by_blockchain_id(&update.blockchain_payment_id, update.pay_currency)
            .await
        {
            Ok(payment) => payment,
            Err(StoreError::NotFound) if update.state == PaymentStateName::Expired => {
                info!("Discarding expiry of unknown payment");
                return Ok(UpdateOutcome::Discarded);
            }
            Err(e) => return Err(e.into()),
        };

        let _guard = self.lock_payment(found.id).await;
        let payment = self.payments.find_payment_by_id(found.id).await?;
        self.transition(
            payment,
            NewPaymentState {
                state: update.state,
                pay_amount: update.pay_amount,
                actually_paid: update.actually_paid,
            },
            update.tx_hash,
            None,
        )
        .await
    }

    /// Assign the buyer's currency to a payment in `CurrencySelection` and
    /// move it to `Waiting`.
    #[tracing::instrument(skip(self))]
    pub async fn select_currency(
        &self,
        payment_id: Uuid,
        currency: CryptoCurrencyName,
    ) -> Result<UpdateOutcome, PaymentError> {
        let _guard = self.lock_payment(payment_id).await;
        let payment = self.payments.find_payment_by_id(payment_id).await?;
        let current = current_state(&payment)?.state;
        if current != PaymentStateName::CurrencySelection {
            return Err(PaymentError::Validation(format!(
                "payment is in state {current}, not awaiting a currency selection"
            )));
        }

        let merchant = self
            .merchants
            .find_merchant_by_id(payment.merchant_id)
            .await?;
        let deposit = self
            .request_deposit(
                &merchant,
                payment.mode,
                currency,
                payment.price_amount,
                payment.price_currency,
            )
            .await?;

        let assignment = PayAssignment {
            wallet_id: deposit.wallet_id,
            pay_currency: currency,
            blockchain_payment_id: deposit.blockchain_payment_id,
            pay_address: deposit.pay_address,
        };
        self.transition(
            payment,
            NewPaymentState {
                state: PaymentStateName::Waiting,
                pay_amount: deposit.pay_amount,
                actually_paid: BigUint::ZERO,
            },
            None,
            Some(assignment),
        )
        .await
    }

    /// The payment's current state as stored.
    pub async fn current_state_of(
        &self,
        payment_id: Uuid,
    ) -> Result<PaymentStateName, PaymentError> {
        let payment = self.payments.find_payment_by_id(payment_id).await?;
        Ok(current_state(&payment)?.state)
    }

    /// Expire a payment whose buyer never picked a currency.
    #[tracing::instrument(skip(self))]
    pub async fn expire_unselected(&self, payment_id: Uuid) -> Result<UpdateOutcome, PaymentError> {
        let _guard = self.lock_payment(payment_id).await;
        let payment = self.payments.find_payment_by_id(payment_id).await?;
        let current = current_state(&payment)?.clone();
        if current.state != PaymentStateName::CurrencySelection {
            return Ok(UpdateOutcome::OutOfOrder {
                current: current.state,
            });
        }
        self.transition(
            payment,
            NewPaymentState {
                state: PaymentStateName::Expired,
                pay_amount: current.pay_amount,
                actually_paid: current.actually_paid,
            },
            None,
            None,
        )
        .await
    }

    /// Validate, persist and notify. The caller holds the payment's lock.
    async fn transition(
        &self,
        payment: Payment,
        next: NewPaymentState,
        tx_hash: Option<String>,
        assignment: Option<PayAssignment>,
    ) -> Result<UpdateOutcome, PaymentError> {
        let current = current_state(&payment)?.state;

        if next.state != PaymentStateName::PartiallyPaid && payment.has_state(next.state) {
            info!(payment_id = %payment.id, state = %next.state, "Ignoring duplicate state update");
            return Ok(UpdateOutcome::Duplicate);
        }
        if !current.can_transition_to(next.state) {
            warn!(payment_id = %payment.id, %current, next = %next.state, "Ignoring out-of-order state update");
            return Ok(UpdateOutcome::OutOfOrder { current });
        }

        let next_state = next.state;
        match self
            .payments
            .update_payment(PaymentUpdate {
                payment_id: payment.id,
                new_state: next,
                tx_hash,
                assignment,
            })
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict) => {
                info!(payment_id = %payment.id, state = %next_state, "State recorded concurrently");
                return Ok(UpdateOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let payment = self.payments.find_payment_by_id(payment.id).await?;
        info!(payment_id = %payment.id, from = %current, to = %next_state, "Payment state changed");
        Ok(UpdateOutcome::Applied(Box::new(self.notify(payment).await?)))
    }

    /// Broadcast first, then the webhook. Neither failure undoes the write.
    async fn notify(&self, payment: Payment) -> Result<AppliedUpdate, PaymentError> {
        let state = current_state(&payment)?.clone();

        let broadcast = match self.hubs.get(payment.id).await {
            Some(hub) => match self.lifecycle_message(&payment, &state) {
                Ok(message) => match hub.broadcast(WsEnvelope::update(message)).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!(payment_id = %payment.id, error = %e, "Broadcast failed");
                        None
                    }
                },
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "Could not render broadcast");
                    None
                }
            },
            None => None,
        };

        let webhook = self.webhooks.deliver(&payment, &state).await;

        if state.state.is_terminal() {
            self.hubs.retire(payment.id).await;
        }
        Ok(AppliedUpdate {
            payment,
            broadcast,
            webhook,
        })
    }

    // -----------------------------------------------------------------------
    // Checkout page
    // -----------------------------------------------------------------------

    /// Register a checkout page and replay the current state to it.
    ///
    /// Runs under the payment's lock, so the replay is never older than a
    /// broadcast the page will receive afterwards.
    pub async fn attach(
        &self,
        payment_id: Uuid,
        mut sink: BoxedSink,
    ) -> Result<Attached, PaymentError> {
        let _guard = self.lock_payment(payment_id).await;
        let payment = match self.payments.find_payment_by_id(payment_id).await {
            Ok(payment) => payment,
            Err(StoreError::NotFound) => {
                let code = WsCloseCode::PAYMENT_NOT_FOUND;
                let _ = sink
                    .send(&WsEnvelope::error(code, "payment not found"))
                    .await;
                sink.close(code, "payment not found").await;
                return Err(PaymentError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let state = current_state(&payment)?.clone();
        let initial = match state.state {
            PaymentStateName::CurrencySelection => WsServerMessage::CurrencySelection {
                currencies: self.selectable_currencies(&payment).await?,
            },
            _ => self.lifecycle_message(&payment, &state)?,
        };

        let hub = self.hubs.get_or_create(payment_id).await;
        let client_id = hub.register(sink).await?;
        hub.send_to(client_id, WsEnvelope::initial(initial)).await?;
        if state.state.is_terminal() {
            self.hubs.retire(payment_id).await;
        }

        let selection_deadline = (state.state == PaymentStateName::CurrencySelection).then(|| {
            let elapsed =
                std::time::Duration::try_from(OffsetDateTime::now_utc() - state.created_at)
                    .unwrap_or_default();
            tokio::time::Instant::now() + self.config.selection_timeout.saturating_sub(elapsed)
        });

        info!(payment_id = %payment_id, client_id, state = %state.state, "Checkout page attached");
        Ok(Attached {
            hub,
            client_id,
            state: state.state,
            selection_deadline,
        })
    }

    /// Currencies with both a blockchain service and a merchant wallet.
    async fn selectable_currencies(
        &self,
        payment: &Payment,
    ) -> Result<Vec<CurrencyDetail>, PaymentError> {
        let merchant = self
            .merchants
            .find_merchant_by_id(payment.merchant_id)
            .await?;
        Ok(self
            .precision
            .details()
            .into_iter()
            .filter(|detail| {
                let currency = CryptoCurrencyName::from(detail.short_name);
                self.blockchains.supports(currency)
                    && merchant.wallet_for(currency, payment.mode).is_some()
            })
            .collect())
    }

    fn lifecycle_message(
        &self,
        payment: &Payment,
        state: &PaymentStateRecord,
    ) -> Result<WsServerMessage, PaymentError> {
        Ok(WsServerMessage::Lifecycle {
            state: state.state.into(),
            payment: self.snapshot(payment, state)?,
        })
    }

    /// What the checkout page renders for `state` of `payment`.
    pub fn snapshot(
        &self,
        payment: &Payment,
        state: &PaymentStateRecord,
    ) -> Result<PaymentSnapshot, PrecisionError> {
        Ok(PaymentSnapshot {
            currency: payment.pay_currency.map(Into::into),
            pay_address: payment.pay_address.clone(),
            pay_amount: display_amount(&self.precision, payment.pay_currency, &state.pay_amount)?,
            actually_paid: display_amount(
                &self.precision,
                payment.pay_currency,
                &state.actually_paid,
            )?,
            expire_time: payment
                .entered_at(PaymentStateName::Waiting)
                .map(|waiting| (waiting + self.config.payment_ttl).unix_timestamp()),
            mode: payment.mode.into(),
            success_page_url: payment.success_page_url.clone(),
            failure_page_url: payment.failure_page_url.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Merchant views
    // -----------------------------------------------------------------------

    pub fn payment_response(&self, payment: &Payment) -> Result<PaymentResponse, PaymentError> {
        let state = current_state(payment)?;
        Ok(PaymentResponse {
            id: payment.id,
            mode: payment.mode.into(),
            price_amount: payment.price_amount,
            price_currency: payment.price_currency.into(),
            pay_currency: payment.pay_currency.map(Into::into),
            pay_address: payment.pay_address.clone(),
            pay_amount: display_amount(&self.precision, payment.pay_currency, &state.pay_amount)?,
            actually_paid: display_amount(
                &self.precision,
                payment.pay_currency,
                &state.actually_paid,
            )?,
            state: state.state.into(),
            tx_hash: payment.tx_hash.clone(),
            created_at: payment.created_at.unix_timestamp(),
            updated_at: payment.updated_at.unix_timestamp(),
        })
    }

    /// Every payment of a merchant in `mode`, newest first, with history.
    pub async fn list_payments(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
    ) -> Result<Vec<PaymentLogEntry>, PaymentError> {
        let payments = self.payments.list_payments(merchant_id, mode).await?;
        payments
            .iter()
            .map(|payment| -> Result<PaymentLogEntry, PaymentError> {
                let history = payment
                    .history
                    .iter()
                    .map(|record| -> Result<PaymentHistoryEntry, PrecisionError> {
                        Ok(PaymentHistoryEntry {
                            state: record.state.into(),
                            pay_amount: display_amount(
                                &self.precision,
                                payment.pay_currency,
                                &record.pay_amount,
                            )?,
                            actually_paid: display_amount(
                                &self.precision,
                                payment.pay_currency,
                                &record.actually_paid,
                            )?,
                            created_at: record.created_at.unix_timestamp(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PaymentLogEntry {
                    payment: self.payment_response(payment)?,
                    history,
                })
            })
            .collect()
    }
}

fn validate_price(price_amount: Decimal) -> Result<(), PaymentError> {
    if price_amount <= Decimal::ZERO {
        return Err(PaymentError::Validation(
            "price amount must be positive".to_string(),
        ));
    }
    Ok(())
}

fn current_state(payment: &Payment) -> Result<&PaymentStateRecord, PaymentError> {
    payment
        .current_state()
        .ok_or(PaymentError::EmptyHistory(payment.id))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::HubConfig;
    use crate::entities::ApiKeyTypeName;
    use crate::processors::blockchain_client::testing::ScriptedBlockchainClient;
    use crate::processors::webhook_sender::testing::RecordingTransport;
    use crate::storage::memory::{MemoryStore, merchant_with_wallets};
    use crate::vault::{ApiKeyVault, KdfParams};
    use chaingate_sdk::objects::CryptoCurrency;
    use std::time::Duration;

    pub(crate) struct Harness {
        pub(crate) engine: Arc<PaymentEngine>,
        pub(crate) store: Arc<MemoryStore>,
        pub(crate) transport: Arc<RecordingTransport>,
        pub(crate) merchant: Merchant,
        pub(crate) webhook_secret: String,
    }

    /// A merchant with a BTC test-mode wallet, a BTC service quoting one
    /// coin per payment, and an issued secret key.
    pub(crate) async fn harness(config: EngineConfig) -> Harness {
        harness_with(
            config,
            ScriptedBlockchainClient::new(CryptoCurrency::Btc, "100000000", "tb1qdeposit"),
        )
        .await
    }

    pub(crate) async fn harness_with(
        config: EngineConfig,
        btc: ScriptedBlockchainClient,
    ) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let merchant = merchant_with_wallets(&[(
            CryptoCurrencyName::Btc,
            ModeName::Test,
            "tb1qmerchant",
        )]);
        store.insert_merchant(merchant.clone()).await;

        let kdf = KdfParams {
            log_n: 4,
            r: 8,
            p: 1,
        };
        let vault = Arc::new(ApiKeyVault::new(&[9u8; 32], kdf, store.clone()).unwrap());
        let issued = vault
            .create_key(merchant.id, ModeName::Test, ApiKeyTypeName::Secret)
            .await
            .unwrap();

        let precision = Arc::new(PrecisionTable::default());
        let transport = Arc::new(RecordingTransport::default());
        let engine = PaymentEngine::new(
            store.clone(),
            store.clone(),
            BlockchainClients::new().with(CryptoCurrencyName::Btc, Arc::new(btc)),
            Arc::new(HubRegistry::new(config.hub.clone())),
            WebhookDispatcher::new(vault, transport.clone(), precision.clone()),
            precision,
            config,
        );
        Harness {
            engine: Arc::new(engine),
            store,
            transport,
            merchant,
            webhook_secret: issued.secret,
        }
    }

    pub(crate) fn test_config() -> EngineConfig {
        EngineConfig {
            selection_timeout: Duration::from_secs(60),
            payment_ttl: Duration::from_secs(900),
            hub: HubConfig {
                send_timeout: Duration::from_millis(100),
                ..HubConfig::default()
            },
        }
    }

    pub(crate) fn invoice_request() -> CreateInvoice {
        CreateInvoice {
            mode: ModeName::Test,
            price_amount: Decimal::from(10),
            price_currency: FiatCurrencyName::Usd,
            callback_url: "https://shop.example/hook".to_string(),
            success_page_url: Some("https://shop.example/ok".to_string()),
            failure_page_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Harness, harness, harness_with, invoice_request, test_config};
    use super::*;
    use crate::hub::testing::RecordingSink;
    use crate::processors::blockchain_client::testing::ScriptedBlockchainClient;
    use chaingate_sdk::objects::ws::FrameKind;
    use chaingate_sdk::objects::{CryptoCurrency, PaymentState};
    use chaingate_sdk::signature::verify_raw_webhook;

    fn btc_payment() -> CreatePayment {
        CreatePayment {
            mode: ModeName::Test,
            price_amount: Decimal::from(10),
            price_currency: FiatCurrencyName::Usd,
            pay_currency: CryptoCurrencyName::Btc,
            callback_url: "https://shop.example/hook".to_string(),
            success_page_url: None,
            failure_page_url: None,
        }
    }

    fn update(payment: &Payment, state: PaymentStateName, paid: u64) -> StateUpdate {
        StateUpdate {
            blockchain_payment_id: payment.blockchain_payment_id.clone().unwrap(),
            pay_currency: CryptoCurrencyName::Btc,
            state,
            pay_amount: BigUint::from(100_000_000u64),
            actually_paid: BigUint::from(paid),
            tx_hash: None,
        }
    }

    async fn rows(h: &Harness, id: Uuid) -> usize {
        h.store.payment(id).await.unwrap().history.len()
    }

    fn applied(outcome: UpdateOutcome) -> AppliedUpdate {
        match outcome {
            UpdateOutcome::Applied(applied) => *applied,
            other => panic!("expected applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_payment_lifecycle_scenario() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        assert_eq!(payment.current_state().unwrap().state, PaymentStateName::Waiting);
        assert_eq!(rows(&h, payment.id).await, 1);

        let (sink, log) = RecordingSink::new();
        h.engine.attach(payment.id, Box::new(sink)).await.unwrap();

        let outcome = h
            .engine
            .apply_update(update(&payment, PaymentStateName::PartiallyPaid, 50_000_000))
            .await
            .unwrap();
        let partial = applied(outcome);
        assert!(partial.webhook.is_ok());
        assert_eq!(rows(&h, payment.id).await, 2);
        let bodies = h.transport.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["data"]["actuallyPaid"], "0.50000000");
        assert_eq!(bodies[0]["data"]["paymentState"], "partially_paid");

        let outcome = h
            .engine
            .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000))
            .await
            .unwrap();
        let paid = applied(outcome);
        assert_eq!(paid.broadcast.unwrap().delivered, 1);
        assert_eq!(rows(&h, payment.id).await, 3);

        let frames = log.sent();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind, FrameKind::Initial);
        assert_eq!(frames[0].message.message_type(), "waiting");
        assert_eq!(frames[1].message.message_type(), "partially_paid");
        assert_eq!(frames[2].kind, FrameKind::Update);
        assert_eq!(frames[2].message.message_type(), "paid");

        let outcome = h
            .engine
            .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000))
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Duplicate));
        assert_eq!(rows(&h, payment.id).await, 3);
        assert_eq!(log.sent().len(), 3);
        assert_eq!(h.transport.bodies().len(), 2);

        let posts = h.transport.posts.lock().unwrap().clone();
        for (_, body) in &posts {
            verify_raw_webhook(body, h.webhook_secret.as_bytes()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_partially_paid_may_repeat() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        for paid in [10_000_000, 20_000_000, 30_000_000] {
            let outcome = h
                .engine
                .apply_update(update(&payment, PaymentStateName::PartiallyPaid, paid))
                .await
                .unwrap();
            assert!(matches!(outcome, UpdateOutcome::Applied(_)));
        }
        assert_eq!(rows(&h, payment.id).await, 4);
        let stored = h.store.payment(payment.id).await.unwrap();
        assert_eq!(
            stored.current_state().unwrap().actually_paid,
            BigUint::from(30_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_late_paid_after_confirmed_is_applied() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        let (sink, log) = RecordingSink::new();
        h.engine.attach(payment.id, Box::new(sink)).await.unwrap();

        let confirmed = h
            .engine
            .apply_update(update(&payment, PaymentStateName::Confirmed, 100_000_000))
            .await
            .unwrap();
        assert_eq!(confirmed.kind(), UpdateOutcomeKind::Applied);
        let paid = h
            .engine
            .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000))
            .await
            .unwrap();
        assert_eq!(paid.kind(), UpdateOutcomeKind::Applied);

        let stored = h.store.payment(payment.id).await.unwrap();
        assert_eq!(stored.history.len(), 3);
        assert!(stored.has_state(PaymentStateName::Confirmed));
        assert!(stored.has_state(PaymentStateName::Paid));
        let states: Vec<_> = h
            .transport
            .bodies()
            .iter()
            .map(|body| body["data"]["paymentState"].clone())
            .collect();
        assert_eq!(states, ["confirmed", "paid"]);
        assert_eq!(log.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_expiry_after_payment_is_ignored() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        h.engine
            .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000))
            .await
            .unwrap();

        let outcome = h
            .engine
            .apply_update(update(&payment, PaymentStateName::Expired, 100_000_000))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            UpdateOutcome::OutOfOrder {
                current: PaymentStateName::Paid
            }
        ));
        assert_eq!(rows(&h, payment.id).await, 2);
        assert_eq!(h.transport.bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_tx_hash_is_recorded() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        let mut paid = update(&payment, PaymentStateName::Paid, 100_000_000);
        paid.tx_hash = Some("0xabc".to_string());
        let applied = applied(h.engine.apply_update(paid).await.unwrap());
        assert_eq!(applied.payment.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_unknown_payment_expiry_is_discarded() {
        let h = harness(test_config()).await;
        let mut expired = StateUpdate {
            blockchain_payment_id: "nope".to_string(),
            pay_currency: CryptoCurrencyName::Btc,
            state: PaymentStateName::Expired,
            pay_amount: BigUint::ZERO,
            actually_paid: BigUint::ZERO,
            tx_hash: None,
        };
        assert!(matches!(
            h.engine.apply_update(expired.clone()).await.unwrap(),
            UpdateOutcome::Discarded
        ));

        expired.state = PaymentStateName::Paid;
        assert!(matches!(
            h.engine.apply_update(expired).await,
            Err(PaymentError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_apply_once() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.engine
                .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000)),
            h.engine
                .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000)),
        );
        let kinds = [a.unwrap().kind(), b.unwrap().kind()];
        assert!(kinds.contains(&UpdateOutcomeKind::Applied));
        assert!(kinds.contains(&UpdateOutcomeKind::Duplicate));
        assert_eq!(rows(&h, payment.id).await, 2);
        assert_eq!(h.transport.bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_keeps_transition() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        *h.transport.fail_with_status.lock().unwrap() = Some(503);

        let applied = applied(
            h.engine
                .apply_update(update(&payment, PaymentStateName::Paid, 100_000_000))
                .await
                .unwrap(),
        );
        assert!(matches!(
            applied.webhook,
            Err(WebhookError::DeliveryFailed { status: 503, .. })
        ));
        assert_eq!(rows(&h, payment.id).await, 2);
    }

    #[tokio::test]
    async fn test_create_payment_validation() {
        let h = harness(test_config()).await;

        let mut eth = btc_payment();
        eth.pay_currency = CryptoCurrencyName::Eth;
        assert!(matches!(
            h.engine.create_payment(&h.merchant, eth).await,
            Err(PaymentError::Validation(_))
        ));

        let mut main = btc_payment();
        main.mode = ModeName::Main;
        assert!(matches!(
            h.engine.create_payment(&h.merchant, main).await,
            Err(PaymentError::Validation(_))
        ));

        let mut free = btc_payment();
        free.price_amount = Decimal::ZERO;
        assert!(matches!(
            h.engine.create_payment(&h.merchant, free).await,
            Err(PaymentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_amount_too_low_is_upstream_error() {
        let h = harness_with(
            test_config(),
            ScriptedBlockchainClient::new(CryptoCurrency::Btc, "1", "tb1q").rejecting_low_amounts(),
        )
        .await;
        assert!(matches!(
            h.engine.create_payment(&h.merchant, btc_payment()).await,
            Err(PaymentError::Upstream(BlockchainError::AmountTooLow(
                CryptoCurrency::Btc
            )))
        ));
    }

    #[tokio::test]
    async fn test_invoice_currency_selection() {
        let h = harness(test_config()).await;
        let invoice = h
            .engine
            .create_invoice(&h.merchant, invoice_request())
            .await
            .unwrap();
        assert_eq!(
            invoice.current_state().unwrap().state,
            PaymentStateName::CurrencySelection
        );
        assert!(invoice.pay_currency.is_none());

        let (sink, log) = RecordingSink::new();
        let attached = h.engine.attach(invoice.id, Box::new(sink)).await.unwrap();
        assert!(attached.selection_deadline.is_some());
        match &log.sent()[0].message {
            WsServerMessage::CurrencySelection { currencies } => {
                assert_eq!(currencies.len(), 1);
                assert_eq!(currencies[0].short_name, CryptoCurrency::Btc);
                assert_eq!(currencies[0].conversion_factor, "100000000");
            }
            other => panic!("unexpected initial message {other:?}"),
        }

        let applied = applied(
            h.engine
                .select_currency(invoice.id, CryptoCurrencyName::Btc)
                .await
                .unwrap(),
        );
        let payment = &applied.payment;
        assert_eq!(payment.pay_currency, Some(CryptoCurrencyName::Btc));
        assert_eq!(payment.pay_address.as_deref(), Some("tb1qdeposit"));
        assert!(payment.blockchain_payment_id.is_some());
        assert_eq!(payment.current_state().unwrap().state, PaymentStateName::Waiting);

        match &log.sent()[1].message {
            WsServerMessage::Lifecycle { state, payment } => {
                assert_eq!(*state, PaymentState::Waiting);
                assert_eq!(payment.pay_amount, "1.00000000");
                assert!(payment.expire_time.is_some());
                assert_eq!(payment.success_page_url.as_deref(), Some("https://shop.example/ok"));
            }
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(h.transport.bodies()[0]["data"]["paymentState"], "waiting");

        assert!(matches!(
            h.engine
                .select_currency(invoice.id, CryptoCurrencyName::Btc)
                .await,
            Err(PaymentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unselected_invoice_expires() {
        let h = harness(test_config()).await;
        let invoice = h
            .engine
            .create_invoice(&h.merchant, invoice_request())
            .await
            .unwrap();

        let applied = applied(h.engine.expire_unselected(invoice.id).await.unwrap());
        assert_eq!(
            applied.payment.current_state().unwrap().state,
            PaymentStateName::Expired
        );
        assert_eq!(
            h.engine.expire_unselected(invoice.id).await.unwrap().kind(),
            UpdateOutcomeKind::OutOfOrder
        );
    }

    #[tokio::test]
    async fn test_attach_unknown_payment_closes_client() {
        let h = harness(test_config()).await;
        let (sink, log) = RecordingSink::new();
        assert!(matches!(
            h.engine.attach(Uuid::new_v4(), Box::new(sink)).await,
            Err(PaymentError::NotFound)
        ));
        assert_eq!(
            log.sent(),
            vec![WsEnvelope::error(
                WsCloseCode::PAYMENT_NOT_FOUND,
                "payment not found"
            )]
        );
        assert_eq!(log.close_code(), Some(WsCloseCode::PAYMENT_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_list_payments_includes_history() {
        let h = harness(test_config()).await;
        let payment = h
            .engine
            .create_payment(&h.merchant, btc_payment())
            .await
            .unwrap();
        h.engine
            .apply_update(update(&payment, PaymentStateName::PartiallyPaid, 50_000_000))
            .await
            .unwrap();
        h.engine
            .create_invoice(&h.merchant, invoice_request())
            .await
            .unwrap();

        let entries = h
            .engine
            .list_payments(h.merchant.id, ModeName::Test)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        let entry = entries
            .iter()
            .find(|e| e.payment.id == payment.id)
            .unwrap();
        assert_eq!(entry.payment.state, PaymentState::PartiallyPaid);
        assert_eq!(entry.payment.actually_paid, "0.50000000");
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].actually_paid, "0");

        assert!(
            h.engine
                .list_payments(h.merchant.id, ModeName::Main)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
