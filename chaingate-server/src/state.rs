//! Application state shared across all request handlers.

use crate::config::LoadedConfig;
use chaingate_core::framework::DatabaseProcessor;
use chaingate_core::hub::HubRegistry;
use chaingate_core::processors::{
    BlockchainClients, HttpBlockchainClient, HttpWebhookTransport, PaymentEngine,
    WebhookDispatcher,
};
use chaingate_core::utils::precision::PrecisionTable;
use chaingate_core::vault::ApiKeyVault;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    pub engine: Arc<PaymentEngine>,
    pub vault: Arc<ApiKeyVault>,
    /// Expected `X-Internal-Token`, if the internal endpoint is guarded.
    pub internal_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire the vault, blockchain clients, hubs and engine over `db`.
    pub fn new(db: PgPool, config: &LoadedConfig) -> anyhow::Result<Self> {
        let store = Arc::new(DatabaseProcessor { pool: db.clone() });
        let vault = Arc::new(ApiKeyVault::new(
            &config.master_key,
            config.kdf,
            store.clone(),
        )?);

        let mut blockchains = BlockchainClients::new();
        for (currency, url) in &config.blockchains {
            let client =
                HttpBlockchainClient::new((*currency).into(), url, config.blockchain_timeout)?;
            tracing::info!(currency = ?currency, url = %url, "Blockchain service configured");
            blockchains = blockchains.with(*currency, Arc::new(client));
        }

        let precision = Arc::new(PrecisionTable::default());
        let webhooks = WebhookDispatcher::new(
            vault.clone(),
            Arc::new(HttpWebhookTransport::new(config.webhook_timeout)),
            precision.clone(),
        );
        let hubs = Arc::new(HubRegistry::new(config.engine.hub.clone()));
        let engine = Arc::new(PaymentEngine::new(
            store.clone(),
            store,
            blockchains,
            hubs,
            webhooks,
            precision,
            config.engine.clone(),
        ));

        Ok(Self {
            db,
            engine,
            vault,
            internal_token: config.server.internal_token.as_deref().map(Arc::from),
        })
    }
}
