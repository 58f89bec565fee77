//! TOML file configuration structures.
//!
//! These structs directly map to the `chaingate-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    pub blockchain: BlockchainConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
    /// Shared token the blockchain services send in `X-Internal-Token`.
    /// When unset the internal webhook endpoint is unguarded.
    #[serde(default)]
    pub internal_token: Option<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// API key vault section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Hex encoded 32-byte master key. May instead be given on the command
    /// line or in `CHAINGATE_MASTER_KEY`.
    #[serde(default)]
    pub master_key: Option<String>,
    #[serde(default = "default_scrypt_log_n")]
    pub scrypt_log_n: u8,
    #[serde(default = "default_scrypt_r")]
    pub scrypt_r: u32,
    #[serde(default = "default_scrypt_p")]
    pub scrypt_p: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            scrypt_log_n: default_scrypt_log_n(),
            scrypt_r: default_scrypt_r(),
            scrypt_p: default_scrypt_p(),
        }
    }
}

fn default_scrypt_log_n() -> u8 {
    15
}

fn default_scrypt_r() -> u32 {
    8
}

fn default_scrypt_p() -> u32 {
    1
}

/// Base URLs of the per-currency blockchain services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainConfig {
    #[serde(default)]
    pub eth: Option<Url>,
    #[serde(default)]
    pub btc: Option<Url>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// Checkout and hub timing section, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default = "default_fifteen_minutes")]
    pub selection_timeout_secs: u64,
    #[serde(default = "default_fifteen_minutes")]
    pub payment_ttl_secs: u64,
    #[serde(default = "default_hub_send_timeout_secs")]
    pub hub_send_timeout_secs: u64,
    #[serde(default = "default_hub_grace_secs")]
    pub hub_grace_secs: u64,
    #[serde(default = "default_hub_idle_secs")]
    pub hub_idle_secs: u64,
    #[serde(default = "default_hub_sweep_secs")]
    pub hub_sweep_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            selection_timeout_secs: default_fifteen_minutes(),
            payment_ttl_secs: default_fifteen_minutes(),
            hub_send_timeout_secs: default_hub_send_timeout_secs(),
            hub_grace_secs: default_hub_grace_secs(),
            hub_idle_secs: default_hub_idle_secs(),
            hub_sweep_secs: default_hub_sweep_secs(),
        }
    }
}

fn default_fifteen_minutes() -> u64 {
    15 * 60
}

fn default_hub_send_timeout_secs() -> u64 {
    5
}

fn default_hub_grace_secs() -> u64 {
    60
}

fn default_hub_idle_secs() -> u64 {
    10 * 60
}

fn default_hub_sweep_secs() -> u64 {
    30
}

/// Outbound merchant webhook section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}
