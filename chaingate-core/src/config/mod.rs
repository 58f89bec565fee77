//! Runtime configuration of the lifecycle engine.
//!
//! These are validated values shared across crates. Loading and parsing
//! the config file is handled by the server crate.

use std::time::Duration;

/// Timing knobs of the checkout flow and the notification hubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a buyer has to pick a currency before the payment expires.
    pub selection_timeout: Duration,
    /// Added to the `Waiting` timestamp to give the checkout page's
    /// `expireTime`.
    pub payment_ttl: Duration,
    pub hub: HubConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selection_timeout: Duration::from_secs(15 * 60),
            payment_ttl: Duration::from_secs(15 * 60),
            hub: HubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Upper bound for one websocket write.
    pub send_timeout: Duration,
    /// How long a hub survives after its payment reached a terminal state.
    pub retire_grace: Duration,
    /// How long a hub with no clients is kept.
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Capacity of each hub's command queue.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            retire_grace: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }
}
