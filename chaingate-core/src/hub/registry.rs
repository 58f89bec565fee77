//! Lazily created hubs keyed by payment id, with time-based eviction.

use super::Hub;
use crate::config::HubConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

struct Entry {
    hub: Hub,
    last_active: Instant,
    retire_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant, idle_ttl: std::time::Duration) -> bool {
        if self.hub.is_closed() {
            return true;
        }
        if let Some(retire_at) = self.retire_at {
            return now >= retire_at;
        }
        self.hub.client_count() == 0 && now.saturating_duration_since(self.last_active) >= idle_ttl
    }
}

/// Owner of every live [`Hub`]. Built once at startup and shared by `Arc`.
pub struct HubRegistry {
    config: HubConfig,
    hubs: Mutex<HashMap<Uuid, Entry>>,
}

impl HubRegistry {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            hubs: Mutex::new(HashMap::new()),
        }
    }

    /// The hub for `payment_id`, spawning one if none is live.
    pub async fn get_or_create(&self, payment_id: Uuid) -> Hub {
        let mut hubs = self.hubs.lock().await;
        let now = Instant::now();
        if let Some(entry) = hubs.get_mut(&payment_id) {
            if !entry.hub.is_closed() {
                entry.last_active = now;
                return entry.hub.clone();
            }
        }

        let hub = Hub::spawn(payment_id, &self.config);
        hubs.insert(
            payment_id,
            Entry {
                hub: hub.clone(),
                last_active: now,
                retire_at: None,
            },
        );
        debug!(payment_id = %payment_id, "Created hub");
        hub
    }

    /// The live hub for `payment_id`, if any browser ever connected.
    pub async fn get(&self, payment_id: Uuid) -> Option<Hub> {
        let mut hubs = self.hubs.lock().await;
        let entry = hubs.get_mut(&payment_id)?;
        if entry.hub.is_closed() {
            return None;
        }
        entry.last_active = Instant::now();
        Some(entry.hub.clone())
    }

    /// Schedule eviction of a hub whose payment reached a terminal state.
    /// Calling it again keeps the first deadline.
    pub async fn retire(&self, payment_id: Uuid) {
        let mut hubs = self.hubs.lock().await;
        if let Some(entry) = hubs.get_mut(&payment_id) {
            let deadline = Instant::now() + self.config.retire_grace;
            entry.retire_at.get_or_insert(deadline);
        }
    }

    pub async fn len(&self) -> usize {
        self.hubs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hubs.lock().await.is_empty()
    }

    /// Evict retired hubs past their grace period and hubs that have had no
    /// clients for `idle_ttl`. Returns the number evicted.
    pub async fn sweep(&self, now: Instant) -> usize {
        let evicted: Vec<Hub> = {
            let mut hubs = self.hubs.lock().await;
            for entry in hubs.values_mut() {
                if entry.hub.client_count() > 0 && entry.retire_at.is_none() {
                    entry.last_active = entry.last_active.max(now);
                }
            }
            let ids: Vec<Uuid> = hubs
                .iter()
                .filter(|(_, entry)| entry.expired(now, self.config.idle_ttl))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| hubs.remove(id))
                .map(|entry| entry.hub)
                .collect()
        };

        for hub in &evicted {
            hub.close().await;
            debug!(payment_id = %hub.payment_id(), "Evicted hub");
        }
        evicted.len()
    }

    /// Close every hub and forget them.
    pub async fn close_all(&self) {
        let hubs: Vec<Hub> = self
            .hubs
            .lock()
            .await
            .drain()
            .map(|(_, entry)| entry.hub)
            .collect();
        for hub in hubs {
            hub.close().await;
        }
    }

    /// Sweep every `sweep_interval` until shutdown, then close all hubs.
    pub async fn run_evictor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Hub evictor started");
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Hub evictor received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let evicted = self.sweep(Instant::now()).await;
                    if evicted > 0 {
                        let remaining = self.len().await;
                        debug!(evicted, remaining, "Swept hubs");
                    }
                }
            }
        }

        self.close_all().await;
        info!("Hub evictor shutdown complete");
    }
}
