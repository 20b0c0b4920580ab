//! Shared type mapper.
//!
//! Maps `(apiVersion, kind)` to the API resource that serves it. The mapping is
//! discovered with the gateway's own identity, shared by every per-identity
//! client, and refreshed by read-copy-update: lookups keep using the current
//! `Arc<TypeMap>` while a refresh runs, then the new map is swapped in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use xgql_core::{GroupVersionKind, RefreshPolicy, ResourcePath, StoreError};

use crate::store::{Discovery, StoreResult};

// ============================================================================
// TYPE MAP
// ============================================================================

/// An immutable discovery result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMap {
    paths: HashMap<GroupVersionKind, ResourcePath>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: ResourcePath) {
        self.paths.insert(path.gvk(), path);
    }

    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&ResourcePath> {
        self.paths.get(gvk)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.paths.values()
    }
}

impl FromIterator<ResourcePath> for TypeMap {
    fn from_iter<I: IntoIterator<Item = ResourcePath>>(iter: I) -> Self {
        let mut map = TypeMap::new();
        for path in iter {
            map.insert(path);
        }
        map
    }
}

// ============================================================================
// SHARED TYPE MAPPER
// ============================================================================

/// Process-wide kind resolver.
pub struct SharedTypeMapper {
    discovery: Arc<dyn Discovery>,
    current: RwLock<Arc<TypeMap>>,
    /// Serializes refreshes; holds the time of the last completed discovery.
    refreshing: Mutex<Instant>,
    generation: AtomicU64,
    policy: RefreshPolicy,
}

impl SharedTypeMapper {
    /// Run the initial discovery. Failure here is a startup failure.
    pub async fn new(discovery: Arc<dyn Discovery>, policy: RefreshPolicy) -> StoreResult<Self> {
        let map = discovery.discover().await?;
        info!(kinds = map.len(), "Initial discovery completed");
        Ok(Self {
            discovery,
            current: RwLock::new(Arc::new(map)),
            refreshing: Mutex::new(Instant::now()),
            generation: AtomicU64::new(0),
            policy,
        })
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// The mapping lookups are currently served from.
    pub fn snapshot(&self) -> Arc<TypeMap> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Number of successful refreshes since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn resolve(&self, gvk: &GroupVersionKind) -> StoreResult<ResourcePath> {
        self.snapshot()
            .get(gvk)
            .cloned()
            .ok_or_else(|| StoreError::KindUnknown {
                kind: gvk.to_string(),
            })
    }

    /// Re-run discovery and swap in the result.
    ///
    /// Concurrent callers collapse onto a single discovery: a caller that
    /// waited while another refresh completed returns without running its
    /// own. Refreshes closer together than the policy's minimum interval are
    /// skipped. Returns whether this call swapped in a new mapping.
    pub async fn refresh(&self) -> StoreResult<bool> {
        let observed = self.generation();
        let mut last = self.refreshing.lock().await;

        if self.generation() != observed {
            debug!("Type map refreshed by a concurrent caller");
            return Ok(false);
        }
        if observed > 0 && last.elapsed() < self.policy.min_interval {
            debug!(
                min_interval_ms = self.policy.min_interval.as_millis() as u64,
                "Skipping type map refresh, last refresh too recent"
            );
            return Ok(false);
        }

        let map = match self.discovery.discover().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Type map refresh failed, keeping previous mapping");
                return Err(e);
            }
        };

        let kinds = map.len();
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *current = Arc::new(map);
        }
        *last = Instant::now();
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(kinds, "Type map refreshed");
        Ok(true)
    }
}

impl std::fmt::Debug for SharedTypeMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTypeMapper")
            .field("kinds", &self.snapshot().len())
            .field("generation", &self.generation())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn path(group: &str, kind: &str, resource: &str) -> ResourcePath {
        ResourcePath::for_kind(&GroupVersionKind::new(group, "v1", kind), resource, false)
    }

    /// Serves a growing list of kinds; each discovery adds the next one.
    struct GrowingDiscovery {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Discovery for GrowingDiscovery {
        async fn discover(&self) -> StoreResult<TypeMap> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut map: TypeMap = [path("pkg.crossplane.io", "Provider", "providers")]
                .into_iter()
                .collect();
            if n > 0 {
                map.insert(path("example.org", "Widget", "widgets"));
            }
            Ok(map)
        }
    }

    fn policy(min_interval: Duration) -> RefreshPolicy {
        RefreshPolicy {
            min_interval,
            retries: 1,
        }
    }

    #[tokio::test]
    async fn test_resolve_and_kind_unknown() {
        let discovery = Arc::new(GrowingDiscovery {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let mapper = SharedTypeMapper::new(discovery, policy(Duration::ZERO))
            .await
            .unwrap();

        let provider = GroupVersionKind::new("pkg.crossplane.io", "v1", "Provider");
        assert_eq!(mapper.resolve(&provider).unwrap().plural(), "providers");

        let widget = GroupVersionKind::new("example.org", "v1", "Widget");
        assert!(matches!(
            mapper.resolve(&widget),
            Err(StoreError::KindUnknown { .. })
        ));

        assert!(mapper.refresh().await.unwrap());
        assert_eq!(mapper.resolve(&widget).unwrap().plural(), "widgets");
        assert_eq!(mapper.generation(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_collapse() {
        let discovery = Arc::new(GrowingDiscovery {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let mapper = Arc::new(
            SharedTypeMapper::new(discovery.clone(), policy(Duration::from_secs(60)))
                .await
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mapper = Arc::clone(&mapper);
                tokio::spawn(async move { mapper.refresh().await.unwrap() })
            })
            .collect();
        let mut swapped = 0;
        for handle in handles {
            if handle.await.unwrap() {
                swapped += 1;
            }
        }

        // One initial discovery plus exactly one refresh.
        assert_eq!(swapped, 1);
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookups_not_blocked_by_refresh() {
        let discovery = Arc::new(GrowingDiscovery {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let mapper = Arc::new(
            SharedTypeMapper::new(discovery, policy(Duration::ZERO))
                .await
                .unwrap(),
        );

        let refresher = {
            let mapper = Arc::clone(&mapper);
            tokio::spawn(async move { mapper.refresh().await })
        };
        tokio::task::yield_now().await;

        // The old mapping keeps answering while discovery is in flight.
        let provider = GroupVersionKind::new("pkg.crossplane.io", "v1", "Provider");
        let start = std::time::Instant::now();
        assert!(mapper.resolve(&provider).is_ok());
        assert!(start.elapsed() < Duration::from_millis(100));

        refresher.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_throttles_refresh() {
        let discovery = Arc::new(GrowingDiscovery {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let mapper = SharedTypeMapper::new(discovery.clone(), policy(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(mapper.refresh().await.unwrap());
        assert!(!mapper.refresh().await.unwrap());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(mapper.refresh().await.unwrap());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 3);
    }
}
