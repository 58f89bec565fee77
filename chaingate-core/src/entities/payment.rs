use crate::entities::{
    CryptoCurrencyName, FiatCurrencyName, ModeName, PaymentStateName, parse_amount,
};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// One immutable lifecycle snapshot of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStateRecord {
    /// Sequence number; breaks ties between rows created in the same
    /// transaction.
    pub id: i64,
    pub payment_id: Uuid,
    pub state: PaymentStateName,
    /// Expected amount in the smallest unit.
    pub pay_amount: BigUint,
    /// Received amount in the smallest unit.
    pub actually_paid: BigUint,
    pub created_at: OffsetDateTime,
}

/// A checkout session with its full state history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub mode: ModeName,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrencyName,
    /// `None` until the buyer selected a currency.
    pub pay_currency: Option<CryptoCurrencyName>,
    pub blockchain_payment_id: Option<String>,
    pub pay_address: Option<String>,
    pub callback_url: String,
    pub success_page_url: Option<String>,
    pub failure_page_url: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Oldest first.
    pub history: Vec<PaymentStateRecord>,
}

impl Payment {
    /// The currently effective state: the most recently created record.
    pub fn current_state(&self) -> Option<&PaymentStateRecord> {
        self.history.last()
    }

    pub fn has_state(&self, state: PaymentStateName) -> bool {
        self.history.iter().any(|s| s.state == state)
    }

    /// Creation time of the first record carrying `state`.
    pub fn entered_at(&self, state: PaymentStateName) -> Option<OffsetDateTime> {
        self.history
            .iter()
            .find(|s| s.state == state)
            .map(|s| s.created_at)
    }
}

/// Data for the first state row of a payment or for an appended row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentState {
    pub state: PaymentStateName,
    pub pay_amount: BigUint,
    pub actually_paid: BigUint,
}

/// Data for inserting a new payment together with its first state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub mode: ModeName,
    pub price_amount: Decimal,
    pub price_currency: FiatCurrencyName,
    pub pay_currency: Option<CryptoCurrencyName>,
    pub blockchain_payment_id: Option<String>,
    pub pay_address: Option<String>,
    pub callback_url: String,
    pub success_page_url: Option<String>,
    pub failure_page_url: Option<String>,
    pub initial_state: NewPaymentState,
}

/// Blockchain side of a payment, fixed once the buyer chose a currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayAssignment {
    pub wallet_id: Uuid,
    pub pay_currency: CryptoCurrencyName,
    pub blockchain_payment_id: String,
    pub pay_address: String,
}

/// A history-preserving save: appends one state row and updates the
/// mutable columns of the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub payment_id: Uuid,
    pub new_state: NewPaymentState,
    pub tx_hash: Option<String>,
    pub assignment: Option<PayAssignment>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    merchant_id: Uuid,
    wallet_id: Option<Uuid>,
    mode: ModeName,
    price_amount: Decimal,
    price_currency: FiatCurrencyName,
    pay_currency: Option<CryptoCurrencyName>,
    blockchain_payment_id: Option<String>,
    pay_address: Option<String>,
    callback_url: String,
    success_page_url: Option<String>,
    failure_page_url: Option<String>,
    tx_hash: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl PaymentRow {
    fn with_history(self, history: Vec<PaymentStateRecord>) -> Payment {
        Payment {
            id: self.id,
            merchant_id: self.merchant_id,
            wallet_id: self.wallet_id,
            mode: self.mode,
            price_amount: self.price_amount,
            price_currency: self.price_currency,
            pay_currency: self.pay_currency,
            blockchain_payment_id: self.blockchain_payment_id,
            pay_address: self.pay_address,
            callback_url: self.callback_url,
            success_page_url: self.success_page_url,
            failure_page_url: self.failure_page_url,
            tx_hash: self.tx_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
            history,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentStateRow {
    id: i64,
    payment_id: Uuid,
    state: PaymentStateName,
    pay_amount: String,
    actually_paid: String,
    created_at: OffsetDateTime,
}

impl TryFrom<PaymentStateRow> for PaymentStateRecord {
    type Error = sqlx::Error;

    fn try_from(row: PaymentStateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            payment_id: row.payment_id,
            state: row.state,
            pay_amount: parse_amount("pay_amount", &row.pay_amount)?,
            actually_paid: parse_amount("actually_paid", &row.actually_paid)?,
            created_at: row.created_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, merchant_id, wallet_id, mode, price_amount, price_currency, \
    pay_currency, blockchain_payment_id, pay_address, callback_url, success_page_url, \
    failure_page_url, tx_hash, created_at, updated_at";

const STATE_COLUMNS: &str = "id, payment_id, state, pay_amount::text AS pay_amount, \
    actually_paid::text AS actually_paid, created_at";

async fn fetch_history(
    executor: impl sqlx::PgExecutor<'_>,
    payment_id: Uuid,
) -> Result<Vec<PaymentStateRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaymentStateRow>(&format!(
        "SELECT {STATE_COLUMNS} FROM payment_states \
         WHERE payment_id = $1 ORDER BY created_at ASC, id ASC"
    ))
    .bind(payment_id)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(PaymentStateRecord::try_from).collect()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GetPaymentById {
    pub id: Uuid,
}

impl Processor<GetPaymentById> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentById")]
    async fn process(&self, query: GetPaymentById) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let history = fetch_history(&self.pool, row.id).await?;
        Ok(Some(row.with_history(history)))
    }
}

#[derive(Debug, Clone)]
/// Look a payment up by the identifier its blockchain service assigned.
///
/// Identifiers are only unique per currency, each service owning its own
/// id space.
pub struct GetPaymentByBlockchainId {
    pub blockchain_payment_id: String,
    pub pay_currency: CryptoCurrencyName,
}

impl Processor<GetPaymentByBlockchainId> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByBlockchainId")]
    async fn process(
        &self,
        query: GetPaymentByBlockchainId,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE blockchain_payment_id = $1 AND pay_currency = $2"
        ))
        .bind(&query.blockchain_payment_id)
        .bind(query.pay_currency)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let history = fetch_history(&self.pool, row.id).await?;
        Ok(Some(row.with_history(history)))
    }
}

#[derive(Debug, Clone)]
pub struct InsertPayment {
    pub payment: NewPayment,
}

impl Processor<InsertPayment> for DatabaseProcessor {
    type Output = Payment;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPayment")]
    async fn process(&self, insert: InsertPayment) -> Result<Payment, sqlx::Error> {
        let p = insert.payment;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments \
             (id, merchant_id, wallet_id, mode, price_amount, price_currency, pay_currency, \
              blockchain_payment_id, pay_address, callback_url, success_page_url, failure_page_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(p.id)
        .bind(p.merchant_id)
        .bind(p.wallet_id)
        .bind(p.mode)
        .bind(p.price_amount)
        .bind(p.price_currency)
        .bind(p.pay_currency)
        .bind(&p.blockchain_payment_id)
        .bind(&p.pay_address)
        .bind(&p.callback_url)
        .bind(&p.success_page_url)
        .bind(&p.failure_page_url)
        .fetch_one(&mut *tx)
        .await?;

        let state = sqlx::query_as::<_, PaymentStateRow>(&format!(
            "INSERT INTO payment_states (payment_id, state, pay_amount, actually_paid) \
             VALUES ($1, $2, $3::numeric, $4::numeric) \
             RETURNING {STATE_COLUMNS}"
        ))
        .bind(p.id)
        .bind(p.initial_state.state)
        .bind(p.initial_state.pay_amount.to_string())
        .bind(p.initial_state.actually_paid.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.with_history(vec![PaymentStateRecord::try_from(state)?]))
    }
}

#[derive(Debug, Clone)]
/// Append a state row and update the payment in one transaction.
///
/// Fails with a unique violation when a non-repeatable state is already
/// recorded, and with [`sqlx::Error::RowNotFound`] for an unknown payment.
pub struct AppendPaymentState {
    pub update: PaymentUpdate,
}

impl Processor<AppendPaymentState> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AppendPaymentState")]
    async fn process(&self, append: AppendPaymentState) -> Result<(), sqlx::Error> {
        let u = append.update;
        let (wallet_id, pay_currency, blockchain_payment_id, pay_address) = match u.assignment {
            Some(a) => (
                Some(a.wallet_id),
                Some(a.pay_currency),
                Some(a.blockchain_payment_id),
                Some(a.pay_address),
            ),
            None => (None, None, None, None),
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE payments SET \
                 tx_hash = COALESCE($2, tx_hash), \
                 wallet_id = COALESCE($3, wallet_id), \
                 pay_currency = COALESCE($4, pay_currency), \
                 blockchain_payment_id = COALESCE($5, blockchain_payment_id), \
                 pay_address = COALESCE($6, pay_address), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(u.payment_id)
        .bind(&u.tx_hash)
        .bind(wallet_id)
        .bind(pay_currency)
        .bind(&blockchain_payment_id)
        .bind(&pay_address)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        sqlx::query(
            "INSERT INTO payment_states (payment_id, state, pay_amount, actually_paid) \
             VALUES ($1, $2, $3::numeric, $4::numeric)",
        )
        .bind(u.payment_id)
        .bind(u.new_state.state)
        .bind(u.new_state.pay_amount.to_string())
        .bind(u.new_state.actually_paid.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// All payments of a merchant in one mode, newest first, with history.
pub struct ListPaymentsByMerchant {
    pub merchant_id: Uuid,
    pub mode: ModeName,
}

impl Processor<ListPaymentsByMerchant> for DatabaseProcessor {
    type Output = Vec<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPaymentsByMerchant")]
    async fn process(&self, query: ListPaymentsByMerchant) -> Result<Vec<Payment>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE merchant_id = $1 AND mode = $2 \
             ORDER BY created_at DESC"
        ))
        .bind(query.merchant_id)
        .bind(query.mode)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let state_rows = sqlx::query_as::<_, PaymentStateRow>(&format!(
            "SELECT {STATE_COLUMNS} FROM payment_states \
             WHERE payment_id = ANY($1) ORDER BY created_at ASC, id ASC"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut histories: HashMap<Uuid, Vec<PaymentStateRecord>> = HashMap::new();
        for row in state_rows {
            let record = PaymentStateRecord::try_from(row)?;
            histories.entry(record.payment_id).or_default().push(record);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let history = histories.remove(&row.id).unwrap_or_default();
                row.with_history(history)
            })
            .collect())
    }
}
