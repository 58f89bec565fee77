//! API key issuance, authentication and webhook secret recovery.
//!
//! A key handed to a merchant is `seal("{id}_{secret}")`: the key id and a
//! random secret, encrypted with the process master key. The record stores
//!
//! - for public keys, the clear secret;
//! - for secret keys, an scrypt digest and salt of the secret, a short
//!   display hint, and the sealed combined key so the signing secret can be
//!   recovered for webhooks.

mod cipher;

pub use cipher::KdfParams;

use crate::entities::api_key::ApiKey;
use crate::entities::merchant::Merchant;
use crate::entities::{ApiKeyTypeName, ModeName};
use crate::storage::{MerchantStore, StoreError};
use crate::utils::constant_time_eq;
use cipher::{BASE64, MasterKey, hash_secret};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

const SECRET_LEN: usize = 16;
const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Deliberately carries no detail; the reason is logged instead.
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid master key: expected 32 bytes, got {0}")]
    InvalidMasterKey(usize),

    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("merchant {merchant_id} has no active secret key in {mode:?} mode")]
    NoActiveSecretKey { merchant_id: Uuid, mode: ModeName },

    #[error("api key {0} not found")]
    KeyNotFound(Uuid),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// A freshly issued key. `api_key` and `secret` are never stored in clear
/// for secret keys, so this is the only time the caller sees them.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub record: ApiKey,
    /// The value presented in `X-API-KEY`.
    pub api_key: String,
    /// The clear secret; for secret keys this is the webhook HMAC key.
    pub secret: String,
}

/// Result of a successful [`ApiKeyVault::authenticate`].
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub merchant: Merchant,
    pub api_key: ApiKey,
}

pub struct ApiKeyVault {
    master_key: MasterKey,
    kdf: scrypt::Params,
    store: Arc<dyn MerchantStore>,
}

impl ApiKeyVault {
    pub fn new(
        master_key: &[u8],
        kdf: KdfParams,
        store: Arc<dyn MerchantStore>,
    ) -> Result<Self, VaultError> {
        Ok(Self {
            master_key: MasterKey::from_bytes(master_key)?,
            kdf: kdf.to_scrypt()?,
            store,
        })
    }

    /// Issue and persist a new key for an existing merchant.
    #[tracing::instrument(skip(self))]
    pub async fn create_key(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
        key_type: ApiKeyTypeName,
    ) -> Result<IssuedApiKey, VaultError> {
        self.store.find_merchant_by_id(merchant_id).await?;

        let id = Uuid::now_v7();
        let secret = BASE64.encode(&rand::random::<[u8; SECRET_LEN]>());
        let api_key = self.master_key.seal(&format!("{id}_{secret}"))?;

        let (key, secret_hash, secret_salt, sealed_key) = match key_type {
            ApiKeyTypeName::Public => (secret.clone(), None, None, None),
            ApiKeyTypeName::Secret => {
                let salt: [u8; SALT_LEN] = rand::random();
                let hash = hash_secret(&self.kdf, &secret, &salt).await?;
                (
                    hint(&api_key),
                    Some(BASE64.encode(&hash)),
                    Some(BASE64.encode(&salt)),
                    Some(api_key.clone()),
                )
            }
        };

        let record = ApiKey {
            id,
            merchant_id,
            mode,
            key_type,
            key,
            secret_hash,
            secret_salt,
            sealed_key,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.store.insert_api_key(record.clone()).await?;

        tracing::info!(key_id = %id, %merchant_id, ?mode, ?key_type, "Issued API key");
        Ok(IssuedApiKey {
            record,
            api_key,
            secret,
        })
    }

    /// Resolve a presented key to its merchant.
    ///
    /// Every mismatch yields [`VaultError::Unauthorized`]; only storage
    /// failures other than a missing record surface as errors of their own.
    pub async fn authenticate(&self, presented: &str) -> Result<Authenticated, VaultError> {
        let combined = match self.master_key.open(presented.trim()) {
            Ok(combined) => combined,
            Err(e) => return Err(reject("undecryptable key", &e.to_string())),
        };
        let Some((id_text, secret)) = combined.split_once('_') else {
            return Err(reject("malformed key", "missing separator"));
        };
        let Ok(id) = Uuid::parse_str(id_text) else {
            return Err(reject("malformed key", "invalid key id"));
        };

        let key = match self.store.find_api_key_by_id(id).await {
            Ok(key) => key,
            Err(StoreError::NotFound) => return Err(reject("unknown key", id_text)),
            Err(e) => return Err(e.into()),
        };
        if !key.is_active {
            return Err(reject("inactive key", id_text));
        }

        let matches = match key.key_type {
            ApiKeyTypeName::Public => constant_time_eq(secret.as_bytes(), key.key.as_bytes()),
            ApiKeyTypeName::Secret => self.verify_secret(&key, secret).await?,
        };
        if !matches {
            return Err(reject("secret mismatch", id_text));
        }

        let merchant = match self.store.find_merchant_by_id(key.merchant_id).await {
            Ok(merchant) => merchant,
            Err(StoreError::NotFound) => return Err(reject("orphaned key", id_text)),
            Err(e) => return Err(e.into()),
        };
        Ok(Authenticated {
            merchant,
            api_key: key,
        })
    }

    async fn verify_secret(&self, key: &ApiKey, secret: &str) -> Result<bool, VaultError> {
        let (Some(hash), Some(salt)) = (&key.secret_hash, &key.secret_salt) else {
            tracing::warn!(key_id = %key.id, "Secret key record has no digest");
            return Ok(false);
        };
        let (Ok(hash), Ok(salt)) = (BASE64.decode_str(hash), BASE64.decode_str(salt)) else {
            tracing::warn!(key_id = %key.id, "Secret key digest is not base64");
            return Ok(false);
        };
        let computed = hash_secret(&self.kdf, secret, &salt).await?;
        Ok(constant_time_eq(&computed, &hash))
    }

    /// The clear secret of the merchant's active secret key for `mode`,
    /// used as the webhook HMAC key.
    pub async fn resolve_webhook_secret(
        &self,
        merchant_id: Uuid,
        mode: ModeName,
    ) -> Result<String, VaultError> {
        let key = match self
            .store
            .find_active_api_key(merchant_id, mode, ApiKeyTypeName::Secret)
            .await
        {
            Ok(key) => key,
            Err(StoreError::NotFound) => {
                return Err(VaultError::NoActiveSecretKey { merchant_id, mode });
            }
            Err(e) => return Err(e.into()),
        };
        let sealed = key.sealed_key.as_deref().ok_or_else(|| {
            VaultError::Crypto(format!("secret key {} has no sealed copy", key.id))
        })?;
        let combined = self.master_key.open(sealed)?;
        combined
            .split_once('_')
            .map(|(_, secret)| secret.to_owned())
            .ok_or_else(|| VaultError::Crypto(format!("sealed key {} is malformed", key.id)))
    }

    /// Soft-disable a key of `merchant_id`.
    #[tracing::instrument(skip(self))]
    pub async fn disable_key(&self, merchant_id: Uuid, key_id: Uuid) -> Result<(), VaultError> {
        match self.store.deactivate_api_key(key_id, merchant_id).await {
            Ok(()) => {
                tracing::info!("Disabled API key");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(VaultError::KeyNotFound(key_id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn reject(reason: &'static str, detail: &str) -> VaultError {
    tracing::warn!(reason, detail, "API key authentication failed");
    VaultError::Unauthorized
}

/// First and last four characters of the key, for display in listings.
fn hint(api_key: &str) -> String {
    let len = api_key.len();
    match (api_key.get(..4), len.checked_sub(4).and_then(|s| api_key.get(s..))) {
        (Some(head), Some(tail)) if len > 8 => format!("{head}...{tail}"),
        _ => "...".to_string(),
    }
}
