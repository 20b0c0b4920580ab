//! Selective caching client.
//!
//! One client per identity. Kinds in the exclusion set are always read with a
//! direct call. Any other kind gets a background reflector on first access:
//! it follows the kind with a `kube` watcher and keeps a reflector store that
//! reads are served from once the initial list has landed. Until then, and
//! while a reflector cannot list or watch, reads fall back to direct calls.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Event;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use xgql_core::{
    ApiResource, ClientError, DynamicObject, ExclusionSet, GatewayConfig, GroupVersionKind,
    IdentityKey, ObjectExt, ObjectKey, ObjectReference, ResourcePath, StoreError,
};

use crate::mapper::SharedTypeMapper;
use crate::store::{ObjectStore, StoreResult, WatchStream};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on each direct call.
    pub call_timeout: Duration,
    /// Delay before a failed or closed watch is opened again.
    pub watch_retry_interval: Duration,
    /// Mapper refreshes attempted after a `KindUnknown` outcome.
    pub refresh_retries: u32,
}

impl ClientOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            watch_retry_interval: config.watch_retry_interval,
            refresh_retries: config.refresh.retries,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

// ============================================================================
// PER-KIND INDEX
// ============================================================================

/// State of a kind's reflector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindPhase {
    /// Initial list in flight.
    Syncing,
    /// Index is current; reads are served locally.
    Synced,
    /// List or watch failed; reads go direct.
    Degraded(ClientError),
}

/// Objects of one kind, written only by the kind's reflector.
struct KindIndex {
    objects: Store<DynamicObject>,
    resource: ApiResource,
    phase: watch::Sender<KindPhase>,
}

impl KindIndex {
    fn phase(&self) -> KindPhase {
        self.phase.borrow().clone()
    }

    fn set_phase(&self, phase: KindPhase) {
        self.phase.send_replace(phase);
    }

    fn get(&self, key: &ObjectKey) -> Option<Arc<DynamicObject>> {
        let mut object_ref = ObjectRef::new_with(&key.name, self.resource.clone());
        if let Some(ns) = &key.namespace {
            object_ref = object_ref.within(ns);
        }
        self.objects.get(&object_ref)
    }

    fn list(&self, namespace: Option<&str>) -> Vec<Arc<DynamicObject>> {
        let mut objects: Vec<Arc<DynamicObject>> = self
            .objects
            .state()
            .into_iter()
            .filter(|obj| namespace.is_none() || obj.metadata.namespace.as_deref() == namespace)
            .collect();
        objects.sort_by_cached_key(|obj| obj.key());
        objects
    }
}

struct KindEntry {
    index: Arc<KindIndex>,
    task: AbortHandle,
}

// ============================================================================
// REFLECTOR
// ============================================================================

/// Keeps one kind's index current for one identity.
struct Reflector {
    identity: IdentityKey,
    store: Arc<dyn ObjectStore>,
    path: ResourcePath,
    index: Arc<KindIndex>,
    retry: Duration,
}

impl Reflector {
    async fn run(self, mut writer: Writer<DynamicObject>) {
        loop {
            match self.store.watch(&self.path).await {
                Ok(events) => self.follow(events, &mut writer).await,
                Err(e) => self.degrade(e),
            }
            tokio::time::sleep(self.retry).await;
        }
    }

    /// Apply events until the stream ends. Each completed (re)list swaps the
    /// whole store and marks the kind synced.
    async fn follow(&self, mut events: WatchStream, writer: &mut Writer<DynamicObject>) {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    writer.apply_watcher_event(&event);
                    if matches!(event, Event::InitDone) {
                        self.synced();
                    }
                }
                Err(e) => self.degrade(e),
            }
        }
        debug!(
            identity = %self.identity.short(),
            kind = %self.path.gvk(),
            "Watch closed, reopening"
        );
    }

    fn synced(&self) {
        if self.index.phase() != KindPhase::Synced {
            info!(
                identity = %self.identity.short(),
                kind = %self.path.gvk(),
                objects = self.index.objects.state().len(),
                "Kind synced"
            );
        }
        self.index.set_phase(KindPhase::Synced);
    }

    fn degrade(&self, err: StoreError) {
        let kind = self.path.gvk().to_string();
        match &err {
            StoreError::Forbidden { .. } | StoreError::KindUnknown { .. } => debug!(
                identity = %self.identity.short(),
                kind = %kind,
                error = %err,
                "Watch failed, serving kind with direct calls"
            ),
            _ => warn!(
                identity = %self.identity.short(),
                kind = %kind,
                error = %err,
                "Watch failed, serving kind with direct calls"
            ),
        }
        self.index.set_phase(KindPhase::Degraded(ClientError::WatchFailed {
            kind,
            reason: err.to_string(),
        }));
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Reads objects with one identity's credentials.
pub struct SelectiveCachingClient {
    identity: IdentityKey,
    store: Arc<dyn ObjectStore>,
    mapper: Arc<SharedTypeMapper>,
    exclusions: Arc<ExclusionSet>,
    options: ClientOptions,
    kinds: DashMap<GroupVersionKind, KindEntry>,
    closed: AtomicBool,
}

impl SelectiveCachingClient {
    pub fn new(
        identity: IdentityKey,
        store: Arc<dyn ObjectStore>,
        mapper: Arc<SharedTypeMapper>,
        exclusions: Arc<ExclusionSet>,
        options: ClientOptions,
    ) -> Self {
        Self {
            identity,
            store,
            mapper,
            exclusions,
            options,
            kinds: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> IdentityKey {
        self.identity
    }

    /// Fetch one object.
    pub async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        self.with_refresh(gvk, |path| self.get_at(path, namespace, name))
            .await
    }

    /// List objects of a kind, optionally in one namespace.
    pub async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        self.with_refresh(gvk, |path| self.list_at(path, namespace))
            .await
    }

    /// Dereference an object reference.
    pub async fn get_reference(
        &self,
        reference: &ObjectReference,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        self.get(&reference.gvk(), reference.namespace.as_deref(), &reference.name)
            .await
    }

    /// Whether a reflector has been started for the kind.
    pub fn is_watching(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    pub fn phase(&self, gvk: &GroupVersionKind) -> Option<KindPhase> {
        self.kinds.get(gvk).map(|entry| entry.index.phase())
    }

    /// Stop every reflector. Later reads are served with direct calls.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let watched = self.kinds.len();
        self.kinds.retain(|_, entry| {
            entry.task.abort();
            false
        });
        if watched > 0 {
            debug!(identity = %self.identity.short(), watched, "Client watches stopped");
        }
    }

    /// Resolve the kind and run `op`, refreshing the type map and retrying
    /// when the kind turns out to be unknown.
    async fn with_refresh<T, F, Fut>(&self, gvk: &GroupVersionKind, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(ResourcePath) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut refreshes = 0;
        loop {
            let outcome = match self.mapper.resolve(gvk) {
                Ok(path) => op(path).await,
                Err(e) => Err(ClientError::from(e)),
            };
            match outcome {
                Err(ClientError::KindUnknown { .. }) if refreshes < self.options.refresh_retries => {
                    refreshes += 1;
                    self.forget(gvk);
                    if let Err(e) = self.mapper.refresh().await {
                        debug!(kind = %gvk, error = %e, "Refresh after unknown kind failed");
                    }
                }
                outcome => return outcome,
            }
        }
    }

    async fn get_at(
        &self,
        path: ResourcePath,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        let namespace = if path.namespaced { namespace } else { None };
        match self.synced_index(&path) {
            Some(index) => {
                let key = ObjectKey::new(namespace.map(str::to_string), name);
                index.get(&key).ok_or_else(|| ClientError::NotFound {
                    kind: path.gvk().group_kind().to_string(),
                    name: key.to_string(),
                })
            }
            None => {
                let obj = self.direct(self.store.get(&path, namespace, name)).await?;
                Ok(Arc::new(obj.with_type_meta(path.api_version(), path.kind())))
            }
        }
    }

    async fn list_at(
        &self,
        path: ResourcePath,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        let namespace = if path.namespaced { namespace } else { None };
        match self.synced_index(&path) {
            Some(index) => Ok(index.list(namespace)),
            None => {
                let items = self.direct(self.store.list(&path, namespace)).await?;
                Ok(items
                    .into_iter()
                    .map(|obj| Arc::new(obj.with_type_meta(path.api_version(), path.kind())))
                    .collect())
            }
        }
    }

    /// The kind's index if it may serve reads, starting a reflector on first
    /// access. `None` means read directly. A kind that has not finished its
    /// initial list is read directly rather than waited for, so the first
    /// read of a kind costs one direct call, never a full sync.
    fn synced_index(&self, path: &ResourcePath) -> Option<Arc<KindIndex>> {
        let gvk = path.gvk();
        if self.exclusions.contains(&gvk.group_kind()) || self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let index = {
            let entry = self
                .kinds
                .entry(gvk.clone())
                .or_insert_with(|| self.start_reflector(path.clone()));
            Arc::clone(&entry.index)
        };

        // A shutdown that ran between the check above and the insert has
        // already swept the map; stop the reflector it missed.
        if self.closed.load(Ordering::SeqCst) {
            self.forget(&gvk);
            return None;
        }

        (index.phase() == KindPhase::Synced).then_some(index)
    }

    fn start_reflector(&self, path: ResourcePath) -> KindEntry {
        debug!(identity = %self.identity.short(), kind = %path.gvk(), "Starting watch");
        let writer = Writer::new(path.resource.clone());
        let (phase, _) = watch::channel(KindPhase::Syncing);
        let index = Arc::new(KindIndex {
            objects: writer.as_reader(),
            resource: path.resource.clone(),
            phase,
        });
        let reflector = Reflector {
            identity: self.identity,
            store: Arc::clone(&self.store),
            path,
            index: Arc::clone(&index),
            retry: self.options.watch_retry_interval,
        };
        let task = tokio::spawn(reflector.run(writer)).abort_handle();
        KindEntry { index, task }
    }

    fn forget(&self, gvk: &GroupVersionKind) {
        if let Some((_, entry)) = self.kinds.remove(gvk) {
            entry.task.abort();
        }
    }

    async fn direct<T>(
        &self,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(self.options.call_timeout, call).await {
            Ok(result) => result.map_err(ClientError::from),
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: self.options.call_timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for SelectiveCachingClient {
    fn drop(&mut self) {
        for entry in self.kinds.iter() {
            entry.task.abort();
        }
    }
}

impl std::fmt::Debug for SelectiveCachingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectiveCachingClient")
            .field("identity", &self.identity)
            .field("watched_kinds", &self.kinds.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCluster, Verb};
    use crate::store::StoreConnector;
    use async_trait::async_trait;
    use serde_json::json;
    use xgql_core::{Anonymizer, Credentials, GroupKind, RefreshPolicy};

    fn gvk(group: &str, kind: &str) -> GroupVersionKind {
        GroupVersionKind::new(group, "v1", kind)
    }

    fn object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> DynamicObject {
        let mut value = json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name},
        });
        if let Some(ns) = namespace {
            value["metadata"]["namespace"] = json!(ns);
        }
        serde_json::from_value(value).unwrap()
    }

    fn options() -> ClientOptions {
        ClientOptions {
            call_timeout: Duration::from_secs(2),
            watch_retry_interval: Duration::from_millis(20),
            refresh_retries: 1,
        }
    }

    async fn client_with_store(
        cluster: &MemoryCluster,
        token: &str,
        store: Arc<dyn ObjectStore>,
    ) -> SelectiveCachingClient {
        let mapper = SharedTypeMapper::new(
            Arc::new(cluster.clone()),
            RefreshPolicy {
                min_interval: Duration::ZERO,
                retries: 1,
            },
        )
        .await
        .unwrap();
        SelectiveCachingClient::new(
            Anonymizer::new([0u8; 32]).anonymize(&Credentials::bearer(token)),
            store,
            Arc::new(mapper),
            Arc::new(ExclusionSet::default()),
            options(),
        )
    }

    async fn client(cluster: &MemoryCluster, token: &str) -> SelectiveCachingClient {
        let store = cluster.connect(&Credentials::bearer(token)).await.unwrap();
        client_with_store(cluster, token, store).await
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn eventually_found(
        client: &SelectiveCachingClient,
        kind: &GroupVersionKind,
        name: &str,
        present: bool,
    ) {
        for _ in 0..200 {
            if client.get(kind, None, name).await.is_ok() == present {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never became present={}", name, present);
    }

    /// Watches open only after a long delay; direct calls answer quickly.
    struct SlowSyncStore {
        inner: Arc<dyn ObjectStore>,
    }

    #[async_trait]
    impl ObjectStore for SlowSyncStore {
        async fn get(
            &self,
            path: &ResourcePath,
            namespace: Option<&str>,
            name: &str,
        ) -> StoreResult<DynamicObject> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.get(path, namespace, name).await
        }

        async fn list(
            &self,
            path: &ResourcePath,
            namespace: Option<&str>,
        ) -> StoreResult<Vec<DynamicObject>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.list(path, namespace).await
        }

        async fn watch(&self, path: &ResourcePath) -> StoreResult<WatchStream> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.inner.watch(path).await
        }
    }

    #[tokio::test]
    async fn test_excluded_kind_is_never_watched() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("v1", "Secret", Some("default"), "creds"));
        let client = client(&cluster, "alice").await;
        let secret = gvk("", "Secret");

        for _ in 0..5 {
            client.get(&secret, Some("default"), "creds").await.unwrap();
            client.list(&secret, Some("default")).await.unwrap();
        }

        let kind = GroupKind::core("Secret");
        assert!(!client.is_watching(&secret));
        assert_eq!(cluster.round_trips(Verb::Get, &kind), 5);
        assert_eq!(cluster.round_trips(Verb::List, &kind), 5);
        assert_eq!(cluster.round_trips(Verb::Watch, &kind), 0);
    }

    #[tokio::test]
    async fn test_cached_kind_served_from_index() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        let client = client(&cluster, "alice").await;
        let provider = gvk("pkg.crossplane.io", "Provider");

        // The first read is direct and starts the reflector.
        assert_eq!(client.list(&provider, None).await.unwrap().len(), 1);
        assert!(client.is_watching(&provider));
        eventually(|| client.phase(&provider) == Some(KindPhase::Synced)).await;

        for _ in 0..5 {
            let obj = client.get(&provider, None, "aws").await.unwrap();
            assert_eq!(obj.kind(), "Provider");
        }
        assert_eq!(client.list(&provider, None).await.unwrap().len(), 1);

        let kind = GroupKind::new("pkg.crossplane.io", "Provider");
        assert_eq!(cluster.round_trips(Verb::List, &kind), 1);
        assert_eq!(cluster.round_trips(Verb::Get, &kind), 0);
        assert_eq!(cluster.round_trips(Verb::Watch, &kind), 1);

        // Later writes arrive through the watch.
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "gcp"));
        eventually_found(&client, &provider, "gcp", true).await;
        assert_eq!(cluster.round_trips(Verb::Get, &kind), 0);

        cluster.delete(&kind, &ObjectKey::cluster("aws"));
        eventually_found(&client, &provider, "aws", false).await;
    }

    #[tokio::test]
    async fn test_unsynced_kind_reads_direct_without_waiting() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        let inner = cluster.connect(&Credentials::bearer("alice")).await.unwrap();
        let client = client_with_store(&cluster, "alice", Arc::new(SlowSyncStore { inner })).await;
        let provider = gvk("pkg.crossplane.io", "Provider");

        let listed = tokio::time::timeout(Duration::from_secs(2), client.list(&provider, None)).await;
        assert!(matches!(listed, Ok(Ok(ref items)) if items.len() == 1));
        let fetched =
            tokio::time::timeout(Duration::from_secs(2), client.get(&provider, None, "aws")).await;
        assert!(matches!(fetched, Ok(Ok(_))));

        assert!(client.is_watching(&provider));
        assert_eq!(client.phase(&provider), Some(KindPhase::Syncing));
    }

    #[tokio::test]
    async fn test_namespaced_list_from_index() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("v1", "Event", Some("a"), "e1"));
        cluster.apply(object("v1", "Event", Some("b"), "e2"));
        let client = client(&cluster, "alice").await;
        let event = gvk("", "Event");

        assert_eq!(client.list(&event, None).await.unwrap().len(), 2);
        eventually(|| client.phase(&event) == Some(KindPhase::Synced)).await;

        let all = client.list(&event, None).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.name()).collect::<Vec<_>>(),
            vec!["e1", "e2"]
        );
        let in_a = client.list(&event, Some("a")).await.unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].name(), "e1");
        assert!(client.get(&event, Some("a"), "e1").await.is_ok());
        assert!(client.get(&event, Some("b"), "e1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_forbidden_kind_degrades_to_direct_calls() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        let kind = GroupKind::new("pkg.crossplane.io", "Provider");
        cluster.deny("mallory", kind.clone());
        let client = client(&cluster, "mallory").await;
        let provider = gvk("pkg.crossplane.io", "Provider");

        let err = client.list(&provider, None).await.unwrap_err();
        assert!(matches!(err, ClientError::Forbidden { .. }));
        eventually(|| matches!(client.phase(&provider), Some(KindPhase::Degraded(_)))).await;

        // Access restored: the reflector recovers on its next attempt.
        cluster.allow("mallory", &kind);
        eventually(|| client.phase(&provider) == Some(KindPhase::Synced)).await;
        assert_eq!(client.list(&provider, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_watch_degrades() {
        let cluster = MemoryCluster::new();
        let kind = GroupKind::new("pkg.crossplane.io", "Provider");
        let client = client(&cluster, "alice").await;
        let provider = gvk("pkg.crossplane.io", "Provider");
        assert!(client.list(&provider, None).await.unwrap().is_empty());
        eventually(|| client.phase(&provider) == Some(KindPhase::Synced)).await;

        cluster.deny("alice", kind.clone());
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        eventually(|| matches!(client.phase(&provider), Some(KindPhase::Degraded(_)))).await;

        // Not served from a stale index: the direct call reports the denial.
        let err = client.get(&provider, None, "aws").await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_closed_watch_is_reopened() {
        let cluster = MemoryCluster::new();
        let kind = GroupKind::new("pkg.crossplane.io", "Provider");
        let client = client(&cluster, "alice").await;
        let provider = gvk("pkg.crossplane.io", "Provider");
        client.list(&provider, None).await.unwrap();
        eventually(|| client.phase(&provider) == Some(KindPhase::Synced)).await;
        assert_eq!(cluster.round_trips(Verb::Watch, &kind), 1);

        cluster.close_watches();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        eventually(|| cluster.round_trips(Verb::Watch, &kind) == 2).await;

        // The reopened watch's snapshot carries the write made while closed.
        eventually_found(&client, &provider, "aws", true).await;
        assert_eq!(client.phase(&provider), Some(KindPhase::Synced));
        assert_eq!(cluster.round_trips(Verb::List, &kind), 1);
        assert_eq!(cluster.round_trips(Verb::Get, &kind), 0);
    }

    #[tokio::test]
    async fn test_unknown_kind_refreshes_mapper_and_retries() {
        let cluster = MemoryCluster::new();
        let client = client(&cluster, "alice").await;
        let widget = gvk("example.org", "Widget");

        // Added after the mapper's initial discovery.
        cluster.register(ResourcePath::for_kind(&widget, "widgets", false));
        cluster.apply(object("example.org/v1", "Widget", None, "w1"));

        let widgets = client.list(&widget, None).await.unwrap();
        assert_eq!(widgets.len(), 1);
        assert_eq!(client.mapper.generation(), 1);

        let missing = gvk("example.org", "Gadget");
        let err = client.list(&missing, None).await.unwrap_err();
        assert!(matches!(err, ClientError::KindUnknown { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_stops_watches() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        let client = client(&cluster, "alice").await;
        let provider = gvk("pkg.crossplane.io", "Provider");
        client.list(&provider, None).await.unwrap();
        assert!(client.is_watching(&provider));

        client.shutdown();
        assert!(!client.is_watching(&provider));

        // Still usable, without restarting a watch.
        assert!(client.get(&provider, None, "aws").await.is_ok());
        assert!(!client.is_watching(&provider));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reads_racing_shutdown_leave_no_watch() {
        let cluster = MemoryCluster::new();
        cluster.apply(object("pkg.crossplane.io/v1", "Provider", None, "aws"));
        let client = Arc::new(client(&cluster, "alice").await);
        let provider = gvk("pkg.crossplane.io", "Provider");

        let readers: Vec<_> = (0..32)
            .map(|_| {
                let client = Arc::clone(&client);
                let provider = provider.clone();
                tokio::spawn(async move {
                    let _ = client.list(&provider, None).await;
                })
            })
            .collect();
        client.shutdown();
        for reader in readers {
            reader.await.unwrap();
        }

        assert!(!client.is_watching(&provider));
        assert!(client.list(&provider, None).await.is_ok());
        assert!(!client.is_watching(&provider));
    }
}
