//! xgql Test Utilities
//!
//! Shared test infrastructure for the xgql workspace:
//! - Object fixtures for Crossplane providers, revisions, CRDs and events
//! - Identities and proptest generators for credentials
//! - A connector that counts client constructions
//! - A seeded in-memory cluster and a cache builder

pub use xgql_clients::{
    ClientCache, MemoryCluster, SharedTypeMapper, StoreConnector, StoreResult, Verb,
};
pub use xgql_core::{
    Anonymizer, ClientError, Credentials, DynamicObject, GatewayConfig, GroupKind,
    GroupVersionKind, Impersonation, ObjectExt, ObjectMeta, ObjectReference, OwnerReference,
    TypeMeta,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use xgql_clients::ObjectStore;

/// Crossplane package API version.
pub const PKG_API_VERSION: &str = "pkg.crossplane.io/v1";
/// Kubernetes CRD API version.
pub const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";

pub mod fixtures {
    //! Object builders. Every builder sets a UID so owner matching works.

    use super::*;

    /// A bare object of any kind.
    pub fn object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(str::to_string),
                uid: Some(format!("uid-{}", name)),
                ..ObjectMeta::default()
            },
            data: json!({}),
        }
    }

    /// Owner reference pointing at `owner`.
    pub fn owner_ref(owner: &DynamicObject, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: owner.api_version().to_string(),
            kind: owner.kind().to_string(),
            name: owner.name().to_string(),
            uid: owner.uid().unwrap_or_default().to_string(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }

    /// Add an owner reference to `obj`.
    pub fn owned_by(mut obj: DynamicObject, owner: &DynamicObject, controller: bool) -> DynamicObject {
        obj.metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner_ref(owner, controller));
        obj
    }

    pub fn provider(name: &str) -> DynamicObject {
        let mut obj = object(PKG_API_VERSION, "Provider", None, name);
        obj.data = json!({
            "spec": {
                "package": format!("xpkg.upbound.io/crossplane/{}:v1.0.0", name),
                "revisionActivationPolicy": "Automatic",
                "revisionHistoryLimit": 1
            },
            "status": {
                "currentRevision": format!("{}-rev", name),
                "conditions": [
                    {"type": "Healthy", "status": "True", "reason": "HealthyPackageRevision"},
                    {"type": "Installed", "status": "True", "reason": "ActivePackageRevision"}
                ]
            }
        });
        obj
    }

    /// A revision controlled by `provider`, listing `objects` in its status.
    pub fn provider_revision(
        name: &str,
        provider: &DynamicObject,
        active: bool,
        objects: &[ObjectReference],
    ) -> DynamicObject {
        let mut obj = object(PKG_API_VERSION, "ProviderRevision", None, name);
        obj.data = json!({
            "spec": {
                "desiredState": if active { "Active" } else { "Inactive" },
                "package": provider.str_field(&["spec", "package"]).unwrap_or_default(),
                "revision": 1
            },
            "status": {
                "conditions": [{"type": "Healthy", "status": "True"}],
                "objectRefs": objects
            }
        });
        owned_by(obj, provider, true)
    }

    pub fn crd(group: &str, kind: &str, plural: &str) -> DynamicObject {
        let name = format!("{}.{}", plural, group);
        let mut obj = object(CRD_API_VERSION, "CustomResourceDefinition", None, &name);
        obj.data = json!({
            "spec": {
                "group": group,
                "names": {"kind": kind, "plural": plural, "singular": kind.to_lowercase()},
                "scope": "Cluster",
                "versions": [{"name": "v1", "served": true, "storage": true}]
            },
            "status": {
                "conditions": [{"type": "Established", "status": "True"}]
            }
        });
        obj
    }

    /// Reference to a CRD suitable for a revision's `objectRefs`.
    pub fn crd_ref(crd: &DynamicObject) -> ObjectReference {
        ObjectReference {
            api_version: CRD_API_VERSION.to_string(),
            kind: "CustomResourceDefinition".to_string(),
            name: crd.name().to_string(),
            namespace: None,
            uid: crd.metadata.uid.clone(),
        }
    }

    /// An event in `default` about `involved`.
    pub fn event(name: &str, involved: &DynamicObject, reason: &str) -> DynamicObject {
        let mut obj = object("v1", "Event", Some("default"), name);
        obj.data = json!({
            "involvedObject": {
                "apiVersion": involved.api_version(),
                "kind": involved.kind(),
                "name": involved.name(),
                "uid": involved.uid()
            },
            "type": "Normal",
            "reason": reason,
            "message": format!("{} {}", reason, involved.name()),
            "source": {"component": "packages/provider.pkg.crossplane.io"},
            "count": 1
        });
        obj
    }
}

pub mod identities {
    //! Caller identities.

    use super::*;

    pub fn alice() -> Credentials {
        Credentials::bearer("alice-token")
    }

    pub fn bob() -> Credentials {
        Credentials::bearer("bob-token")
    }

    /// A privileged token acting as `user` in `groups`.
    pub fn impersonating(user: &str, groups: &[&str]) -> Credentials {
        let imp = groups
            .iter()
            .fold(Impersonation::user(user), |imp, g| imp.with_group(*g));
        Credentials::bearer("gateway-token").with_impersonation(imp)
    }

    /// Principal the in-memory cluster authorizes `alice()` as.
    pub const ALICE: &str = "alice-token";
    pub const BOB: &str = "bob-token";
}

pub mod generators {
    //! Proptest strategies for credentials.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_token() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._-]{1,48}"
    }

    pub fn arb_impersonation() -> impl Strategy<Value = Impersonation> {
        (
            "[a-z][a-z0-9-]{0,15}",
            prop::collection::vec("[a-z][a-z0-9:-]{0,15}", 0..4),
        )
            .prop_map(|(user, groups)| {
                groups
                    .into_iter()
                    .fold(Impersonation::user(user), |imp, g| imp.with_group(g))
            })
    }

    pub fn arb_credentials() -> impl Strategy<Value = Credentials> {
        prop_oneof![
            Just(Credentials::anonymous()),
            arb_token().prop_map(Credentials::bearer),
            (arb_token(), arb_impersonation())
                .prop_map(|(t, imp)| Credentials::bearer(t).with_impersonation(imp)),
        ]
    }
}

// ============================================================================
// CONNECTORS
// ============================================================================

/// Wraps a [`MemoryCluster`] and counts how many stores were constructed.
pub struct CountingConnector {
    pub cluster: MemoryCluster,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingConnector {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self::with_delay(cluster, Duration::ZERO)
    }

    /// Each construction takes `delay`, widening race windows.
    pub fn with_delay(cluster: MemoryCluster, delay: Duration) -> Self {
        Self {
            cluster,
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for CountingConnector {
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn ObjectStore>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.cluster.connect(credentials).await
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Handles to the objects [`seeded_cluster`] creates.
pub struct Seeded {
    pub cluster: MemoryCluster,
    pub provider: DynamicObject,
    pub other_provider: DynamicObject,
    pub active_revision: DynamicObject,
    pub inactive_revision: DynamicObject,
    pub foreign_revision: DynamicObject,
    pub crd: DynamicObject,
}

/// A cluster with two providers, their revisions, one CRD and a few events.
///
/// `provider-aws` controls an active and an inactive revision.
/// `provider-gcp` controls a third revision that also lists `provider-aws`
/// as a non-controlling owner. The active revision lists the CRD, a
/// ConfigMap and a second CRD reference that does not exist.
pub fn seeded_cluster() -> Seeded {
    use fixtures::*;

    let cluster = MemoryCluster::new();

    let provider = cluster.apply(provider("provider-aws"));
    let other_provider = cluster.apply(fixtures::provider("provider-gcp"));
    let crd = cluster.apply(fixtures::crd("aws.crossplane.io", "Bucket", "buckets"));

    let config_map = ObjectReference {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: "package-config".to_string(),
        namespace: Some("crossplane-system".to_string()),
        uid: None,
    };
    let missing_crd = ObjectReference {
        name: "queues.aws.crossplane.io".to_string(),
        ..crd_ref(&crd)
    };

    let active_revision = cluster.apply(provider_revision(
        "provider-aws-active",
        &provider,
        true,
        &[crd_ref(&crd), config_map, missing_crd],
    ));
    let inactive_revision =
        cluster.apply(provider_revision("provider-aws-inactive", &provider, false, &[]));
    let foreign_revision = cluster.apply(owned_by(
        provider_revision("provider-gcp-active", &other_provider, true, &[]),
        &provider,
        false,
    ));

    cluster.apply(event("provider-aws.1", &provider, "InstallPackageRevision"));
    cluster.apply(event("provider-aws.2", &provider, "SyncPackage"));
    cluster.apply(event("provider-gcp.1", &other_provider, "InstallPackageRevision"));

    Seeded {
        cluster,
        provider,
        other_provider,
        active_revision,
        inactive_revision,
        foreign_revision,
        crd,
    }
}

/// A short-timeout gateway configuration for tests.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        call_timeout: Duration::from_secs(2),
        watch_retry_interval: Duration::from_millis(100),
        ..GatewayConfig::default()
    }
}

/// Build a client cache over `cluster` with a fixed anonymizer key.
pub async fn build_cache(
    cluster: &MemoryCluster,
    config: &GatewayConfig,
) -> (Arc<ClientCache>, Arc<CountingConnector>) {
    let mapper = match SharedTypeMapper::new(Arc::new(cluster.clone()), config.refresh.clone()).await {
        Ok(mapper) => Arc::new(mapper),
        Err(e) => panic!("in-memory discovery failed: {}", e),
    };
    let connector = Arc::new(CountingConnector::new(cluster.clone()));
    let cache = ClientCache::new(
        connector.clone(),
        mapper,
        config,
        Anonymizer::new([7u8; 32]),
    );
    (Arc::new(cache), connector)
}

pub mod assertions {
    //! Assertions on client outcomes.

    use super::*;

    /// Assert that a client call failed with the given error code.
    #[track_caller]
    pub fn assert_client_error<T: std::fmt::Debug>(result: &Result<T, ClientError>, code: &str) {
        match result {
            Err(e) => assert_eq!(e.code(), code, "unexpected error {:?}", e),
            Ok(v) => panic!("expected {} error, got Ok({:?})", code, v),
        }
    }
}
