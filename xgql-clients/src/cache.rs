//! Identity-scoped client cache.
//!
//! Maps an anonymized identity key to a long-lived [`SelectiveCachingClient`].
//! Construction is single-flight per key: concurrent first use by the same
//! identity builds one client, while other identities build theirs in
//! parallel. Entries idle past the configured threshold are evicted and their
//! watches stopped.
//!
//! Eviction and lookup both run under the map's shard lock for the key, and
//! a lookup refreshes `last_used` before releasing it, so an entry that a
//! lookup has just returned is never evicted out from under it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use xgql_core::{Anonymizer, ClientError, Credentials, ExclusionSet, GatewayConfig, IdentityKey};

use crate::mapper::SharedTypeMapper;
use crate::selective::{ClientOptions, SelectiveCachingClient};
use crate::store::StoreConnector;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for cache activity.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Clients constructed since startup
    pub constructions: AtomicU64,

    /// Lookups answered by an existing client
    pub hits: AtomicU64,

    /// Entries evicted for idleness
    pub evictions: AtomicU64,

    /// Constructions that failed
    pub construction_failures: AtomicU64,

    /// Eviction sweeps completed
    pub sweeps: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            constructions: self.constructions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub constructions: u64,
    pub hits: u64,
    pub evictions: u64,
    pub construction_failures: u64,
    pub sweeps: u64,
}

// ============================================================================
// ENTRIES
// ============================================================================

struct Slot {
    client: OnceCell<Arc<SelectiveCachingClient>>,
    last_used: Mutex<Instant>,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            client: OnceCell::new(),
            last_used: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        let mut last_used = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        if now > *last_used {
            *last_used = now;
        }
    }

    /// Constructed and unused for longer than `idle`. A slot still under
    /// construction is never expired.
    fn is_expired(&self, now: Instant, idle: Duration) -> bool {
        if !self.client.initialized() {
            return false;
        }
        let last_used = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(*last_used) > idle
    }

    fn retire(&self) {
        if let Some(client) = self.client.get() {
            client.shutdown();
        }
    }
}

// ============================================================================
// CLIENT CACHE
// ============================================================================

/// Process-wide cache of per-identity clients.
pub struct ClientCache {
    anonymizer: Anonymizer,
    connector: Arc<dyn StoreConnector>,
    mapper: Arc<SharedTypeMapper>,
    exclusions: Arc<ExclusionSet>,
    options: ClientOptions,
    idle: Duration,
    sweep_interval: Duration,
    entries: DashMap<IdentityKey, Arc<Slot>>,
    metrics: Arc<CacheMetrics>,
}

impl ClientCache {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        mapper: Arc<SharedTypeMapper>,
        config: &GatewayConfig,
        anonymizer: Anonymizer,
    ) -> Self {
        Self {
            anonymizer,
            connector,
            mapper,
            exclusions: Arc::new(config.exclusions.clone()),
            options: ClientOptions::from_config(config),
            idle: config.cache_idle,
            sweep_interval: config.cache_sweep_interval,
            entries: DashMap::new(),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn mapper(&self) -> &Arc<SharedTypeMapper> {
        &self.mapper
    }

    pub fn anonymizer(&self) -> &Anonymizer {
        &self.anonymizer
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Live entries, including ones still under construction.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the client for these credentials, constructing it on first use.
    pub async fn get_or_create(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<SelectiveCachingClient>, ClientError> {
        let key = self.anonymizer.anonymize(credentials);
        let now = Instant::now();

        // An expired entry is replaced rather than revived.
        if let Some((_, stale)) = self
            .entries
            .remove_if(&key, |_, slot| slot.is_expired(now, self.idle))
        {
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(identity = %key.short(), "Replacing expired client");
            stale.retire();
        }

        let slot = {
            let entry = self
                .entries
                .entry(key)
                .or_insert_with(|| Arc::new(Slot::new(now)));
            entry.touch(now);
            Arc::clone(entry.value())
        };

        if let Some(client) = slot.client.get() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(client));
        }

        let result = slot
            .client
            .get_or_try_init(|| self.construct(key, credentials))
            .await;

        match result {
            Ok(client) => Ok(Arc::clone(client)),
            Err(e) => {
                self.metrics
                    .construction_failures
                    .fetch_add(1, Ordering::Relaxed);
                // Drop the empty slot so the next lookup tries again.
                self.entries.remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &slot) && !current.client.initialized()
                });
                warn!(identity = %key.short(), error = %e, "Client construction failed");
                Err(e)
            }
        }
    }

    async fn construct(
        &self,
        key: IdentityKey,
        credentials: &Credentials,
    ) -> Result<Arc<SelectiveCachingClient>, ClientError> {
        let store = match tokio::time::timeout(
            self.options.call_timeout,
            self.connector.connect(credentials),
        )
        .await
        {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => {
                return Err(ClientError::ClientConstructionFailed {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ClientError::Timeout {
                    timeout_ms: self.options.call_timeout.as_millis() as u64,
                })
            }
        };

        self.metrics.constructions.fetch_add(1, Ordering::Relaxed);
        debug!(identity = %key.short(), "Constructed client");
        Ok(Arc::new(SelectiveCachingClient::new(
            key,
            store,
            Arc::clone(&self.mapper),
            Arc::clone(&self.exclusions),
            self.options.clone(),
        )))
    }

    /// Remove entries idle past the threshold and stop their watches.
    /// Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.entries.retain(|key, slot| {
            if slot.is_expired(now, self.idle) {
                evicted.push((*key, Arc::clone(slot)));
                false
            } else {
                true
            }
        });

        for (key, slot) in &evicted {
            debug!(identity = %key.short(), "Evicting idle client");
            slot.retire();
        }
        self.metrics.sweeps.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every sweep interval until the
    /// shutdown signal is received.
    pub fn spawn_eviction(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep = interval(cache.sweep_interval);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                idle_secs = cache.idle.as_secs(),
                sweep_secs = cache.sweep_interval.as_secs(),
                "Client cache eviction task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Client cache eviction task shutting down");
                            break;
                        }
                    }

                    _ = sweep.tick() => {
                        let evicted = cache.evict_idle();
                        if evicted > 0 {
                            info!(evicted, remaining = cache.len(), "Evicted idle clients");
                        } else {
                            tracing::trace!("Eviction sweep found no idle clients");
                        }
                    }
                }
            }
        })
    }

    /// Drop every entry and stop all watches.
    pub fn shutdown(&self) {
        let mut drained = 0usize;
        self.entries.retain(|_, slot| {
            slot.retire();
            drained += 1;
            false
        });

        let snapshot = self.metrics.snapshot();
        info!(
            drained,
            constructions = snapshot.constructions,
            hits = snapshot.hits,
            evictions = snapshot.evictions,
            construction_failures = snapshot.construction_failures,
            "Client cache shut down"
        );
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("entries", &self.entries.len())
            .field("idle", &self.idle)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
