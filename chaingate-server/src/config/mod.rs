//! Configuration module for chaingate-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables, and turns it into the validated values the
//! engine and vault are built from.

pub mod file;

use crate::config::file::FileConfig;
use chaingate_core::config::{EngineConfig, HubConfig};
use chaingate_core::entities::CryptoCurrencyName;
use chaingate_core::vault::KdfParams;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid master key: {0}")]
    MasterKey(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub internal_token: Option<String>,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    /// Raw 32-byte master key.
    pub master_key: Vec<u8>,
    pub kdf: KdfParams,
    /// Blockchain service base URL per supported currency.
    pub blockchains: Vec<(CryptoCurrencyName, Url)>,
    pub blockchain_timeout: Duration,
    pub webhook_timeout: Duration,
    pub engine: EngineConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
    master_key_override: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(
        config_path: impl AsRef<Path>,
        listen_override: Option<SocketAddr>,
        master_key_override: Option<String>,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
            master_key_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(master_key) = &self.master_key_override {
            file_config.vault.master_key = Some(master_key.clone());
        }

        self.validate(&file_config)?;
        build_loaded_config(file_config)
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if config.blockchain.eth.is_none() && config.blockchain.btc.is_none() {
            return Err(ConfigError::ValidationError(
                "at least one blockchain service URL must be configured".to_string(),
            ));
        }

        let checkout = &config.checkout;
        for (name, value) in [
            ("selection_timeout_secs", checkout.selection_timeout_secs),
            ("hub_send_timeout_secs", checkout.hub_send_timeout_secs),
            ("hub_sweep_secs", checkout.hub_sweep_secs),
            ("blockchain.timeout_secs", config.blockchain.timeout_secs),
            ("webhook.timeout_secs", config.webhook.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if let Some(token) = &config.server.internal_token {
            if token.is_empty() {
                return Err(ConfigError::ValidationError(
                    "internal_token must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let master_key = decode_master_key(file_config.vault.master_key.as_deref())?;

    let blockchains = [
        (CryptoCurrencyName::Eth, file_config.blockchain.eth),
        (CryptoCurrencyName::Btc, file_config.blockchain.btc),
    ]
    .into_iter()
    .filter_map(|(currency, url)| url.map(|url| (currency, url)))
    .collect();

    let checkout = file_config.checkout;
    Ok(LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
            internal_token: file_config.server.internal_token,
        },
        master_key,
        kdf: KdfParams {
            log_n: file_config.vault.scrypt_log_n,
            r: file_config.vault.scrypt_r,
            p: file_config.vault.scrypt_p,
        },
        blockchains,
        blockchain_timeout: Duration::from_secs(file_config.blockchain.timeout_secs),
        webhook_timeout: Duration::from_secs(file_config.webhook.timeout_secs),
        engine: EngineConfig {
            selection_timeout: Duration::from_secs(checkout.selection_timeout_secs),
            payment_ttl: Duration::from_secs(checkout.payment_ttl_secs),
            hub: HubConfig {
                send_timeout: Duration::from_secs(checkout.hub_send_timeout_secs),
                retire_grace: Duration::from_secs(checkout.hub_grace_secs),
                idle_ttl: Duration::from_secs(checkout.hub_idle_secs),
                sweep_interval: Duration::from_secs(checkout.hub_sweep_secs),
                ..HubConfig::default()
            },
        },
    })
}

fn decode_master_key(hex_key: Option<&str>) -> Result<Vec<u8>, ConfigError> {
    let hex_key = hex_key.ok_or_else(|| {
        ConfigError::MasterKey(
            "not set; use [vault] master_key, --master-key or CHAINGATE_MASTER_KEY".to_string(),
        )
    })?;
    let bytes =
        hex::decode(hex_key.trim()).map_err(|e| ConfigError::MasterKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::MasterKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn loader() -> ConfigLoader {
        ConfigLoader::new("unused.toml", None, None)
    }

    #[test]
    fn test_loads_engine_and_vault_settings() {
        let toml_str = format!(
            r#"
[server]
listen = "127.0.0.1:3000"

[vault]
master_key = "{MASTER_KEY}"
scrypt_log_n = 10

[blockchain]
btc = "http://btc-service:9001"

[checkout]
selection_timeout_secs = 60
hub_grace_secs = 5
"#
        );
        let loaded = loader().load_str(&toml_str).unwrap();
        assert_eq!(loaded.master_key.len(), 32);
        assert_eq!(loaded.master_key[31], 0x1f);
        assert_eq!(loaded.kdf.log_n, 10);
        assert_eq!(loaded.blockchains.len(), 1);
        assert_eq!(loaded.blockchains[0].0, CryptoCurrencyName::Btc);
        assert_eq!(loaded.engine.selection_timeout, Duration::from_secs(60));
        assert_eq!(loaded.engine.payment_ttl, Duration::from_secs(900));
        assert_eq!(loaded.engine.hub.retire_grace, Duration::from_secs(5));
        assert_eq!(loaded.engine.hub.queue_capacity, 64);
    }

    #[test]
    fn test_cli_overrides_win() {
        let toml_str = "[server]\nlisten = \"127.0.0.1:3000\"\n[blockchain]\neth = \"http://eth:9000\"\n";
        let loader = ConfigLoader::new(
            "unused.toml",
            Some("0.0.0.0:9999".parse().unwrap()),
            Some(MASTER_KEY.to_string()),
        );
        let loaded = loader.load_str(toml_str).unwrap();
        assert_eq!(loaded.server.listen.port(), 9999);
        assert_eq!(loaded.master_key[1], 0x01);
    }

    #[test]
    fn test_rejects_missing_or_short_master_key() {
        let toml_str = "[server]\n[blockchain]\neth = \"http://eth:9000\"\n";
        assert!(matches!(
            loader().load_str(toml_str),
            Err(ConfigError::MasterKey(_))
        ));

        let short = ConfigLoader::new("unused.toml", None, Some("abcd".to_string()));
        assert!(matches!(
            short.load_str(toml_str),
            Err(ConfigError::MasterKey(_))
        ));
    }

    #[test]
    fn test_requires_a_blockchain_service() {
        let toml_str = format!("[server]\n[vault]\nmaster_key = \"{MASTER_KEY}\"\n[blockchain]\n");
        assert!(matches!(
            loader().load_str(&toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
