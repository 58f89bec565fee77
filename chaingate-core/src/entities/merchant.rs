use crate::entities::{CryptoCurrencyName, ModeName};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub currency: CryptoCurrencyName,
    pub mode: ModeName,
    pub address: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub wallets: Vec<Wallet>,
}

impl Merchant {
    /// The deposit wallet for a currency+mode pair. At most one exists.
    pub fn wallet_for(&self, currency: CryptoCurrencyName, mode: ModeName) -> Option<&Wallet> {
        self.wallets
            .iter()
            .find(|w| w.currency == currency && w.mode == mode)
    }

    pub fn has_wallet_in(&self, mode: ModeName) -> bool {
        self.wallets.iter().any(|w| w.mode == mode)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MerchantRow {
    id: Uuid,
    name: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
/// Load a merchant together with all of its wallets.
pub struct GetMerchantById {
    pub id: Uuid,
}

impl Processor<GetMerchantById> for DatabaseProcessor {
    type Output = Option<Merchant>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMerchantById")]
    async fn process(&self, query: GetMerchantById) -> Result<Option<Merchant>, sqlx::Error> {
        let row = sqlx::query_as::<_, MerchantRow>(
            "SELECT id, name, created_at FROM merchants WHERE id = $1",
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let wallets = sqlx::query_as::<_, Wallet>(
            "SELECT id, merchant_id, currency, mode, address, created_at \
             FROM wallets WHERE merchant_id = $1 ORDER BY created_at ASC",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Merchant {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            wallets,
        }))
    }
}
