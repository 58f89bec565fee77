use crate::entities::{ApiKeyTypeName, ModeName};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// A merchant credential.
///
/// Only `is_active` ever changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub mode: ModeName,
    pub key_type: ApiKeyTypeName,
    /// Clear secret for public keys, display hint for secret keys.
    pub key: String,
    /// Base64 scrypt digest of the clear secret (secret keys only).
    pub secret_hash: Option<String>,
    /// Base64 salt used for `secret_hash` (secret keys only).
    pub secret_salt: Option<String>,
    /// The encrypted combined key (secret keys only), used to recover
    /// the webhook signing secret.
    pub sealed_key: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

const API_KEY_COLUMNS: &str = "id, merchant_id, mode, key_type, key, secret_hash, secret_salt, \
    sealed_key, is_active, created_at";

#[derive(Debug, Clone)]
pub struct GetApiKeyById {
    pub id: Uuid,
}

impl Processor<GetApiKeyById> for DatabaseProcessor {
    type Output = Option<ApiKey>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetApiKeyById")]
    async fn process(&self, query: GetApiKeyById) -> Result<Option<ApiKey>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// The newest active key of a type for a merchant+mode pair.
pub struct GetActiveApiKey {
    pub merchant_id: Uuid,
    pub mode: ModeName,
    pub key_type: ApiKeyTypeName,
}

impl Processor<GetActiveApiKey> for DatabaseProcessor {
    type Output = Option<ApiKey>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveApiKey")]
    async fn process(&self, query: GetActiveApiKey) -> Result<Option<ApiKey>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys \
             WHERE merchant_id = $1 AND mode = $2 AND key_type = $3 AND is_active \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(query.merchant_id)
        .bind(query.mode)
        .bind(query.key_type)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct InsertApiKey {
    pub key: ApiKey,
}

impl Processor<InsertApiKey> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertApiKey")]
    async fn process(&self, insert: InsertApiKey) -> Result<(), sqlx::Error> {
        let k = insert.key;
        sqlx::query(
            "INSERT INTO api_keys \
             (id, merchant_id, mode, key_type, key, secret_hash, secret_salt, sealed_key, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(k.id)
        .bind(k.merchant_id)
        .bind(k.mode)
        .bind(k.key_type)
        .bind(&k.key)
        .bind(&k.secret_hash)
        .bind(&k.secret_salt)
        .bind(&k.sealed_key)
        .bind(k.is_active)
        .bind(k.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Soft-disable a key. Returns whether a matching key was found.
pub struct DeactivateApiKey {
    pub id: Uuid,
    pub merchant_id: Uuid,
}

impl Processor<DeactivateApiKey> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeactivateApiKey")]
    async fn process(&self, query: DeactivateApiKey) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND merchant_id = $2")
                .bind(query.id)
                .bind(query.merchant_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
