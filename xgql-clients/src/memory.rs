//! In-memory cluster.
//!
//! Implements [`StoreConnector`], [`Discovery`] and [`ObjectStore`] over a
//! process-local object table. Access is decided per principal and kind, and
//! every round trip is counted so callers can observe caching behavior.
//! Used for local development (`XGQL_STORE=memory`) and throughout the tests.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{future, stream, StreamExt};
use kube::runtime::watcher::Event;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use xgql_core::{
    Credentials, DynamicObject, GroupKind, GroupVersionKind, ObjectExt, ObjectKey, ResourcePath,
    StoreError, Time, TypeMeta,
};

use crate::mapper::TypeMap;
use crate::store::{Discovery, ObjectStore, StoreConnector, StoreResult, WatchStream};

const WATCH_BUFFER: usize = 1024;
const ANONYMOUS_PRINCIPAL: &str = "system:anonymous";

/// Store verbs, for round trip accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Watch,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
        })
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    Applied(DynamicObject),
    Deleted(DynamicObject),
}

#[derive(Debug, Clone)]
struct Change {
    kind: GroupKind,
    mutation: Mutation,
}

impl Change {
    fn into_event(self, path: &ResourcePath) -> Event<DynamicObject> {
        match self.mutation {
            Mutation::Applied(obj) => Event::Apply(converted(&obj, path)),
            Mutation::Deleted(obj) => Event::Delete(converted(&obj, path)),
        }
    }
}

#[derive(Debug, Clone)]
enum Signal {
    Change(Change),
    /// Ends every open watch stream, as an API server does on timeout.
    Close,
}

#[derive(Default)]
struct Inner {
    paths: TypeMap,
    objects: BTreeMap<GroupKind, BTreeMap<ObjectKey, DynamicObject>>,
    resource_version: u64,
    denied: HashSet<(String, GroupKind)>,
}

struct ClusterState {
    inner: Mutex<Inner>,
    signals: broadcast::Sender<Signal>,
    round_trips: DashMap<(Verb, GroupKind), u64>,
    connections: AtomicU64,
}

impl ClusterState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, verb: Verb, kind: &GroupKind) {
        *self.round_trips.entry((verb, kind.clone())).or_insert(0) += 1;
    }

    fn is_allowed(&self, principal: &str, kind: &GroupKind) -> bool {
        !self
            .lock()
            .denied
            .contains(&(principal.to_string(), kind.clone()))
    }
}

/// A shared handle to an in-memory cluster. Clones see the same objects.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// An empty cluster serving the built-in kinds.
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(WATCH_BUFFER);
        let cluster = Self {
            state: Arc::new(ClusterState {
                inner: Mutex::new(Inner::default()),
                signals,
                round_trips: DashMap::new(),
                connections: AtomicU64::new(0),
            }),
        };
        for path in builtin_paths() {
            cluster.register(path);
        }
        cluster
    }

    /// Load a multi-document YAML file of objects. Kinds that are not built
    /// in are registered with a path inferred from the object.
    pub fn from_yaml(yaml: &str) -> StoreResult<Self> {
        let cluster = Self::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let obj = DynamicObject::deserialize(document).map_err(|e| StoreError::Decode {
                reason: e.to_string(),
            })?;
            if obj.kind().is_empty() || obj.api_version().is_empty() {
                continue;
            }
            if !cluster.serves(&obj) {
                cluster.register(inferred_path(&obj));
            }
            cluster.apply(obj);
        }
        Ok(cluster)
    }

    fn serves(&self, obj: &DynamicObject) -> bool {
        self.state.lock().paths.get(&obj.gvk()).is_some()
    }

    /// Serve a kind at a path.
    pub fn register(&self, path: ResourcePath) {
        self.state.lock().paths.insert(path);
    }

    /// Stop serving a kind; calls for it fail with `KindUnknown`.
    pub fn unregister(&self, path: &ResourcePath) {
        let mut inner = self.state.lock();
        let remaining: TypeMap = inner
            .paths
            .paths()
            .filter(|p| p.gvk() != path.gvk())
            .cloned()
            .collect();
        inner.paths = remaining;
    }

    /// Create or replace an object, assigning a resource version and, when
    /// missing, a uid and creation timestamp.
    pub fn apply(&self, mut obj: DynamicObject) -> DynamicObject {
        let mut inner = self.state.lock();
        inner.resource_version += 1;
        let rv = inner.resource_version;

        obj.metadata.resource_version = Some(rv.to_string());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("{:08x}-{}", rv, obj.name()));
        }
        if obj.metadata.creation_timestamp.is_none() {
            obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        }

        let kind = obj.gvk().group_kind();
        let key = obj.key();
        inner
            .objects
            .entry(kind.clone())
            .or_default()
            .insert(key, obj.clone());
        publish(&self.state, kind, Mutation::Applied(obj.clone()));
        obj
    }

    /// Delete an object. Returns whether it existed.
    pub fn delete(&self, kind: &GroupKind, key: &ObjectKey) -> bool {
        let mut inner = self.state.lock();
        let removed = inner.objects.get_mut(kind).and_then(|objs| objs.remove(key));
        match removed {
            Some(mut obj) => {
                inner.resource_version += 1;
                obj.metadata.resource_version = Some(inner.resource_version.to_string());
                publish(&self.state, kind.clone(), Mutation::Deleted(obj));
                true
            }
            None => false,
        }
    }

    /// Deny a principal (bearer token or impersonated user) every verb on a
    /// kind. Open watches for that kind end with `Forbidden` on their next
    /// event.
    pub fn deny(&self, principal: &str, kind: GroupKind) {
        self.state.lock().denied.insert((principal.to_string(), kind));
    }

    pub fn allow(&self, principal: &str, kind: &GroupKind) {
        self.state
            .lock()
            .denied
            .remove(&(principal.to_string(), kind.clone()));
    }

    /// End every open watch stream normally.
    pub fn close_watches(&self) {
        let _ = self.state.signals.send(Signal::Close);
    }

    /// Round trips served for a verb and kind, including denied ones.
    pub fn round_trips(&self, verb: Verb, kind: &GroupKind) -> u64 {
        self.state
            .round_trips
            .get(&(verb, kind.clone()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Successful [`StoreConnector::connect`] calls.
    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn resource_version(&self) -> u64 {
        self.state.lock().resource_version
    }
}

/// Called with the object table locked, so watches opened under the same
/// lock see each change either in their snapshot or live, never both.
fn publish(state: &ClusterState, kind: GroupKind, mutation: Mutation) {
    // No receivers just means nobody is watching.
    let _ = state.signals.send(Signal::Change(Change { kind, mutation }));
}

/// The principal access decisions are made for.
fn principal(credentials: &Credentials) -> String {
    if let Some(imp) = credentials.impersonation() {
        return imp.user.clone();
    }
    match credentials.bearer_token() {
        Some(token) => token.to_string(),
        None => ANONYMOUS_PRINCIPAL.to_string(),
    }
}

#[async_trait]
impl StoreConnector for MemoryCluster {
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn ObjectStore>> {
        if let Some(token) = credentials.bearer_token() {
            if token.trim().is_empty() || token.chars().any(char::is_control) {
                return Err(StoreError::Invalid {
                    reason: "malformed bearer token".to_string(),
                });
            }
        }
        if let Some(imp) = credentials.impersonation() {
            if imp.user.is_empty() {
                return Err(StoreError::Invalid {
                    reason: "impersonation requires a user".to_string(),
                });
            }
        }
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryStore {
            state: Arc::clone(&self.state),
            principal: principal(credentials),
        }))
    }
}

#[async_trait]
impl Discovery for MemoryCluster {
    async fn discover(&self) -> StoreResult<TypeMap> {
        Ok(self.state.lock().paths.clone())
    }
}

/// An [`ObjectStore`] bound to one principal.
pub struct MemoryStore {
    state: Arc<ClusterState>,
    principal: String,
}

impl MemoryStore {
    /// Count the call, then check that the kind is served and allowed.
    fn admit(&self, verb: Verb, path: &ResourcePath) -> StoreResult<GroupKind> {
        let kind = path.gvk().group_kind();
        self.state.count(verb, &kind);

        if self.state.lock().paths.get(&path.gvk()).is_none() {
            return Err(StoreError::KindUnknown {
                kind: path.gvk().to_string(),
            });
        }
        if !self.state.is_allowed(&self.principal, &kind) {
            return Err(forbidden(verb, &self.principal, &kind));
        }
        Ok(kind)
    }
}

fn forbidden(verb: Verb, principal: &str, kind: &GroupKind) -> StoreError {
    StoreError::Forbidden {
        verb: verb.to_string(),
        kind: kind.to_string(),
        reason: format!("{} cannot {} {}", principal, verb, kind),
    }
}

fn scoped<'a>(path: &ResourcePath, namespace: Option<&'a str>) -> Option<&'a str> {
    if path.namespaced {
        namespace.filter(|ns| !ns.is_empty())
    } else {
        None
    }
}

fn in_namespace(obj_namespace: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        Some(ns) => obj_namespace == Some(ns),
        None => true,
    }
}

/// Objects are stored once per group kind and served at any version.
fn converted(obj: &DynamicObject, path: &ResourcePath) -> DynamicObject {
    let mut obj = obj.clone();
    obj.types = Some(TypeMeta {
        api_version: path.api_version().to_string(),
        kind: path.kind().to_string(),
    });
    obj
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
        name: &str,
    ) -> StoreResult<DynamicObject> {
        let kind = self.admit(Verb::Get, path)?;
        let key = ObjectKey::new(scoped(path, namespace).map(str::to_string), name);
        let inner = self.state.lock();
        inner
            .objects
            .get(&kind)
            .and_then(|objs| objs.get(&key))
            .map(|obj| converted(obj, path))
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.to_string(),
                name: key.to_string(),
            })
    }

    async fn list(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<DynamicObject>> {
        let kind = self.admit(Verb::List, path)?;
        let namespace = scoped(path, namespace);
        let inner = self.state.lock();
        Ok(inner
            .objects
            .get(&kind)
            .map(|objs| {
                objs.values()
                    .filter(|obj| in_namespace(obj.metadata.namespace.as_deref(), namespace))
                    .map(|obj| converted(obj, path))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn watch(&self, path: &ResourcePath) -> StoreResult<WatchStream> {
        let kind = self.admit(Verb::Watch, path)?;

        // Snapshot and subscribe under one lock so no change falls between them.
        let (snapshot, receiver) = {
            let inner = self.state.lock();
            let snapshot: Vec<DynamicObject> = inner
                .objects
                .get(&kind)
                .map(|objs| objs.values().map(|obj| converted(obj, path)).collect())
                .unwrap_or_default();
            (snapshot, self.state.signals.subscribe())
        };
        debug!(kind = %kind, objects = snapshot.len(), "Memory watch opened");

        let initial = stream::iter(
            std::iter::once(Event::Init)
                .chain(snapshot.into_iter().map(Event::InitApply))
                .chain(std::iter::once(Event::InitDone))
                .map(Ok),
        );

        // Close and a lagging receiver both end the stream; the next watch
        // starts from a fresh snapshot.
        let state = Arc::clone(&self.state);
        let principal = self.principal.clone();
        let path = path.clone();
        let live = BroadcastStream::new(receiver)
            .take_while(|signal| future::ready(matches!(signal, Ok(Signal::Change(_)))))
            .filter_map(move |signal| {
                let item = match signal {
                    Ok(Signal::Change(change)) if change.kind == kind => {
                        if state.is_allowed(&principal, &kind) {
                            Some(Ok(change.into_event(&path)))
                        } else {
                            Some(Err(forbidden(Verb::Watch, &principal, &kind)))
                        }
                    }
                    _ => None,
                };
                future::ready(item)
            });

        // An error ends the stream.
        let events = stream::unfold(
            (initial.chain(live).boxed(), false),
            |(mut events, failed)| async move {
                if failed {
                    return None;
                }
                let item = events.next().await?;
                let failed = item.is_err();
                Some((item, (events, failed)))
            },
        );

        Ok(events.boxed())
    }
}

// ============================================================================
// BUILT-IN KINDS
// ============================================================================

fn resource_path(
    group: &str,
    version: &str,
    kind: &str,
    resource: &str,
    namespaced: bool,
) -> ResourcePath {
    ResourcePath::for_kind(&GroupVersionKind::new(group, version, kind), resource, namespaced)
}

/// Kinds an in-memory cluster serves out of the box.
pub fn builtin_paths() -> Vec<ResourcePath> {
    vec![
        resource_path("", "v1", "Namespace", "namespaces", false),
        resource_path("", "v1", "Node", "nodes", false),
        resource_path("", "v1", "Pod", "pods", true),
        resource_path("", "v1", "ConfigMap", "configmaps", true),
        resource_path("", "v1", "Secret", "secrets", true),
        resource_path("", "v1", "Service", "services", true),
        resource_path("", "v1", "ServiceAccount", "serviceaccounts", true),
        resource_path("", "v1", "Event", "events", true),
        resource_path("apps", "v1", "Deployment", "deployments", true),
        resource_path("apps", "v1", "DaemonSet", "daemonsets", true),
        resource_path("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", true),
        resource_path(
            "rbac.authorization.k8s.io",
            "v1",
            "ClusterRoleBinding",
            "clusterrolebindings",
            false,
        ),
        resource_path(
            "apiextensions.k8s.io",
            "v1",
            "CustomResourceDefinition",
            "customresourcedefinitions",
            false,
        ),
        resource_path("pkg.crossplane.io", "v1", "Provider", "providers", false),
        resource_path(
            "pkg.crossplane.io",
            "v1",
            "ProviderRevision",
            "providerrevisions",
            false,
        ),
        resource_path("pkg.crossplane.io", "v1", "Configuration", "configurations", false),
        resource_path(
            "pkg.crossplane.io",
            "v1",
            "ConfigurationRevision",
            "configurationrevisions",
            false,
        ),
        resource_path(
            "apiextensions.crossplane.io",
            "v1",
            "CompositeResourceDefinition",
            "compositeresourcedefinitions",
            false,
        ),
        resource_path("apiextensions.crossplane.io", "v1", "Composition", "compositions", false),
    ]
}

/// Guess a path for a kind seen only in fixtures.
fn inferred_path(obj: &DynamicObject) -> ResourcePath {
    let gvk = obj.gvk();
    let lower = gvk.kind.to_ascii_lowercase();
    let resource = match lower.strip_suffix('y') {
        Some(stem) => format!("{}ies", stem),
        None if lower.ends_with('s') => format!("{}es", lower),
        None => format!("{}s", lower),
    };
    ResourcePath::for_kind(&gvk, &resource, obj.metadata.namespace.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use xgql_core::Impersonation;

    fn provider_path() -> ResourcePath {
        resource_path("pkg.crossplane.io", "v1", "Provider", "providers", false)
    }

    fn provider(name: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "pkg.crossplane.io/v1",
            "kind": "Provider",
            "metadata": {"name": name},
            "spec": {"package": format!("xpkg.upbound.io/{}:v1", name)}
        }))
        .unwrap()
    }

    async fn store(cluster: &MemoryCluster, token: &str) -> Arc<dyn ObjectStore> {
        cluster.connect(&Credentials::bearer(token)).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_list_and_counters() {
        let cluster = MemoryCluster::new();
        cluster.apply(provider("aws"));
        cluster.apply(provider("gcp"));
        let store = store(&cluster, "alice").await;

        let obj = store.get(&provider_path(), None, "aws").await.unwrap();
        assert_eq!(obj.name(), "aws");
        assert!(obj.uid().is_some());

        let list = store.list(&provider_path(), None).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].api_version(), "pkg.crossplane.io/v1");
        assert_eq!(cluster.resource_version(), 2);

        let missing = store.get(&provider_path(), None, "azure").await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        let kind = GroupKind::new("pkg.crossplane.io", "Provider");
        assert_eq!(cluster.round_trips(Verb::Get, &kind), 2);
        assert_eq!(cluster.round_trips(Verb::List, &kind), 1);
        assert_eq!(cluster.connections(), 1);
    }

    #[tokio::test]
    async fn test_access_policy_is_per_principal() {
        let cluster = MemoryCluster::new();
        cluster.apply(provider("aws"));
        cluster.deny("mallory", GroupKind::new("pkg.crossplane.io", "Provider"));

        let denied = store(&cluster, "mallory").await;
        assert!(matches!(
            denied.list(&provider_path(), None).await,
            Err(StoreError::Forbidden { .. })
        ));

        let allowed = store(&cluster, "alice").await;
        assert!(allowed.list(&provider_path(), None).await.is_ok());

        let impersonated = cluster
            .connect(&Credentials::bearer("alice").with_impersonation(Impersonation::user("mallory")))
            .await
            .unwrap();
        assert!(impersonated.get(&provider_path(), None, "aws").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_credentials_rejected() {
        let cluster = MemoryCluster::new();
        assert!(matches!(
            cluster.connect(&Credentials::bearer("  ")).await,
            Err(StoreError::Invalid { .. })
        ));
        assert!(cluster.connect(&Credentials::anonymous()).await.is_ok());
        assert_eq!(cluster.connections(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unknown() {
        let cluster = MemoryCluster::new();
        let store = store(&cluster, "alice").await;
        let widgets = resource_path("example.org", "v1", "Widget", "widgets", false);
        assert!(matches!(
            store.list(&widgets, None).await,
            Err(StoreError::KindUnknown { .. })
        ));

        cluster.register(widgets.clone());
        assert!(store.list(&widgets, None).await.is_ok());
        cluster.unregister(&widgets);
        assert!(store.list(&widgets, None).await.is_err());
    }

    async fn next_event(watch: &mut WatchStream) -> StoreResult<Event<DynamicObject>> {
        tokio::time::timeout(Duration::from_secs(1), watch.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_watch_starts_with_snapshot_then_streams() {
        let cluster = MemoryCluster::new();
        cluster.apply(provider("aws"));
        let store = store(&cluster, "alice").await;
        let mut watch = store.watch(&provider_path()).await.unwrap();

        assert!(matches!(next_event(&mut watch).await, Ok(Event::Init)));
        assert!(matches!(
            next_event(&mut watch).await,
            Ok(Event::InitApply(ref o)) if o.name() == "aws"
        ));
        assert!(matches!(next_event(&mut watch).await, Ok(Event::InitDone)));

        cluster.apply(provider("gcp"));
        assert!(matches!(
            next_event(&mut watch).await,
            Ok(Event::Apply(ref o)) if o.name() == "gcp" && o.kind() == "Provider"
        ));
        cluster.delete(
            &GroupKind::new("pkg.crossplane.io", "Provider"),
            &ObjectKey::cluster("aws"),
        );
        assert!(matches!(
            next_event(&mut watch).await,
            Ok(Event::Delete(ref o)) if o.name() == "aws"
        ));

        cluster.close_watches();
        let end = tokio::time::timeout(Duration::from_secs(1), watch.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_watch_ignores_other_kinds() {
        let cluster = MemoryCluster::new();
        let store = store(&cluster, "alice").await;
        let mut watch = store.watch(&provider_path()).await.unwrap();
        assert!(matches!(next_event(&mut watch).await, Ok(Event::Init)));
        assert!(matches!(next_event(&mut watch).await, Ok(Event::InitDone)));

        cluster.apply(
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "default"}
            }))
            .unwrap(),
        );
        cluster.apply(provider("aws"));
        assert!(matches!(
            next_event(&mut watch).await,
            Ok(Event::Apply(ref o)) if o.name() == "aws"
        ));
    }

    #[tokio::test]
    async fn test_watch_ends_forbidden_after_revocation() {
        let cluster = MemoryCluster::new();
        let store = store(&cluster, "alice").await;
        let mut watch = store.watch(&provider_path()).await.unwrap();
        assert!(matches!(next_event(&mut watch).await, Ok(Event::Init)));
        assert!(matches!(next_event(&mut watch).await, Ok(Event::InitDone)));

        cluster.deny("alice", GroupKind::new("pkg.crossplane.io", "Provider"));
        cluster.apply(provider("aws"));

        assert!(matches!(
            next_event(&mut watch).await,
            Err(StoreError::Forbidden { .. })
        ));
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_denied_up_front() {
        let cluster = MemoryCluster::new();
        cluster.deny("mallory", GroupKind::new("pkg.crossplane.io", "Provider"));
        let store = store(&cluster, "mallory").await;
        assert!(matches!(
            store.watch(&provider_path()).await,
            Err(StoreError::Forbidden { .. })
        ));
        assert_eq!(
            cluster.round_trips(Verb::Watch, &GroupKind::new("pkg.crossplane.io", "Provider")),
            1
        );
    }

    #[tokio::test]
    async fn test_from_yaml_registers_unknown_kinds() {
        let yaml = r#"
apiVersion: pkg.crossplane.io/v1
kind: Provider
metadata:
  name: provider-aws
---
apiVersion: ec2.aws.crossplane.io/v1beta1
kind: VPCPolicy
metadata:
  name: main
"#;
        let cluster = MemoryCluster::from_yaml(yaml).unwrap();
        let map = cluster.discover().await.unwrap();
        let policy = map
            .paths()
            .find(|p| p.kind() == "VPCPolicy")
            .cloned()
            .unwrap();
        assert_eq!(policy.plural(), "vpcpolicies");
        assert!(!policy.namespaced);

        let store = store(&cluster, "alice").await;
        assert_eq!(store.list(&policy, None).await.unwrap().len(), 1);
    }
}
