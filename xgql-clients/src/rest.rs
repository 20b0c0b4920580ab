//! Kubernetes API server store.
//!
//! Built on `kube`: each identity gets its own [`kube::Client`] whose config
//! carries the caller's bearer token and impersonation, objects are read as
//! `Api<DynamicObject>`, watches run through `kube::runtime::watcher`, and
//! discovery uses the gateway's own credentials.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderName, HeaderValue};
use kube::api::{Api, ListParams};
use kube::config::AuthInfo;
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use secrecy::SecretString;
use tracing::{debug, info, warn};
use xgql_core::{
    ConfigError, Credentials, DynamicObject, ObjectExt, ResourcePath, StoreError,
};

use crate::mapper::TypeMap;
use crate::store::{Discovery, ObjectStore, StoreConnector, StoreResult, WatchStream};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Overrides applied on top of the inferred `kube` config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestConfig {
    /// API server URL, e.g. `https://10.0.0.1:443`. Inferred when unset.
    pub api_server: Option<http::Uri>,
    pub insecure_skip_tls_verify: bool,
}

impl RestConfig {
    /// Create RestConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `XGQL_API_SERVER`: API server URL (default: in-cluster config or kubeconfig)
    /// - `XGQL_INSECURE_SKIP_TLS_VERIFY`: "true" disables certificate checks (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_server = match lookup("XGQL_API_SERVER").filter(|s| !s.trim().is_empty()) {
            Some(url) => {
                let url = url.trim().trim_end_matches('/').to_string();
                let invalid = |reason: &str| ConfigError::InvalidValue {
                    field: "XGQL_API_SERVER".to_string(),
                    value: url.clone(),
                    reason: reason.to_string(),
                };
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(invalid("must be an http(s) URL"));
                }
                Some(url.parse::<http::Uri>().map_err(|_| invalid("not a valid URL"))?)
            }
            None => None,
        };

        Ok(Self {
            api_server,
            insecure_skip_tls_verify: lookup("XGQL_INSECURE_SKIP_TLS_VERIFY")
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Builds per-identity [`RestStore`]s from one base `kube` config.
pub struct RestConnector {
    base: kube::Config,
    privileged: Client,
}

impl RestConnector {
    /// Infer the base config from the pod's service account or the local
    /// kubeconfig, then apply the overrides.
    pub async fn infer(overrides: RestConfig) -> StoreResult<Self> {
        let mut base = kube::Config::infer().await.map_err(invalid)?;
        if let Some(url) = overrides.api_server {
            base.cluster_url = url;
        }
        if overrides.insecure_skip_tls_verify {
            base.accept_invalid_certs = true;
        }
        Self::from_config(base)
    }

    /// The base config's own credentials become the gateway's identity,
    /// used only for discovery.
    pub fn from_config(base: kube::Config) -> StoreResult<Self> {
        let privileged = Client::try_from(base.clone()).map_err(invalid)?;
        info!(api_server = %base.cluster_url, "Using API server");
        Ok(Self { base, privileged })
    }

    /// Discovery bound to the gateway's own identity.
    pub fn discovery(&self) -> RestDiscovery {
        RestDiscovery {
            client: self.privileged.clone(),
        }
    }

    /// The base config with its credentials replaced by the caller's.
    fn identity_config(&self, credentials: &Credentials) -> StoreResult<kube::Config> {
        let mut config = self.base.clone();
        let mut auth = AuthInfo::default();

        if let Some(token) = credentials.bearer_token() {
            if token.trim().is_empty() {
                return Err(invalid("empty bearer token"));
            }
            if token.chars().any(char::is_control) {
                return Err(invalid("bearer token is not a valid header value"));
            }
            auth.token = Some(SecretString::from(token.to_string()));
        }

        if let Some(imp) = credentials.impersonation() {
            if imp.user.is_empty() {
                return Err(invalid("impersonation requires a user"));
            }
            auth.impersonate = Some(imp.user.clone());
            if !imp.groups.is_empty() {
                auth.impersonate_groups = Some(imp.groups.clone());
            }
            for (key, values) in &imp.extra {
                let name = HeaderName::from_bytes(format!("impersonate-extra-{}", key).as_bytes())
                    .map_err(|_| invalid("invalid impersonation extra key"))?;
                for value in values {
                    let value = HeaderValue::from_str(value)
                        .map_err(|_| invalid("invalid impersonation extra value"))?;
                    config.headers.push((name.clone(), value));
                }
            }
        }

        config.auth_info = auth;
        Ok(config)
    }
}

#[async_trait]
impl StoreConnector for RestConnector {
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn ObjectStore>> {
        let config = self.identity_config(credentials)?;
        let client = Client::try_from(config).map_err(invalid)?;
        Ok(Arc::new(RestStore { client }))
    }
}

fn invalid(reason: impl fmt::Display) -> StoreError {
    StoreError::Invalid {
        reason: reason.to_string(),
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Map a client error to a store error. A 404 for a named object means the
/// object is missing; a 404 for a collection means the resource itself is not
/// served, which happens when a definition was removed after discovery.
fn api_error(err: kube::Error, verb: &str, path: &ResourcePath, name: Option<&str>) -> StoreError {
    let kind = path.gvk().group_kind().to_string();
    match err {
        kube::Error::Api(response) => match (response.code, name) {
            (404, Some(name)) => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            (404, None) => StoreError::KindUnknown {
                kind: path.gvk().to_string(),
            },
            (403, _) => StoreError::Forbidden {
                verb: verb.to_string(),
                kind,
                reason: response.message,
            },
            (401, _) => StoreError::Unauthorized {
                reason: response.message,
            },
            (410, _) => StoreError::Gone {
                resource_version: response.message,
            },
            (code, _) => StoreError::Transport {
                reason: format!("HTTP {}: {}", code, response.message),
            },
        },
        kube::Error::SerdeError(e) => StoreError::Decode {
            reason: e.to_string(),
        },
        other => StoreError::Transport {
            reason: other.to_string(),
        },
    }
}

fn watch_error(err: watcher::Error, path: &ResourcePath) -> StoreError {
    match err {
        watcher::Error::InitialListFailed(e) => api_error(e, "list", path, None),
        watcher::Error::WatchStartFailed(e) | watcher::Error::WatchFailed(e) => {
            api_error(e, "watch", path, None)
        }
        watcher::Error::WatchError(response) => {
            api_error(kube::Error::Api(response), "watch", path, None)
        }
        other => StoreError::Transport {
            reason: other.to_string(),
        },
    }
}

/// List items and watch objects of dynamic kinds can arrive without type
/// metadata.
fn typed_event(event: watcher::Event<DynamicObject>, path: &ResourcePath) -> watcher::Event<DynamicObject> {
    let typed = |obj: DynamicObject| obj.with_type_meta(path.api_version(), path.kind());
    match event {
        watcher::Event::Apply(obj) => watcher::Event::Apply(typed(obj)),
        watcher::Event::Delete(obj) => watcher::Event::Delete(typed(obj)),
        watcher::Event::InitApply(obj) => watcher::Event::InitApply(typed(obj)),
        watcher::Event::Init => watcher::Event::Init,
        watcher::Event::InitDone => watcher::Event::InitDone,
    }
}

// ============================================================================
// STORE
// ============================================================================

/// An [`ObjectStore`] bound to one identity's client.
pub struct RestStore {
    client: Client,
}

impl RestStore {
    fn api(&self, path: &ResourcePath, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if path.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &path.resource)
            }
            _ => Api::all_with(self.client.clone(), &path.resource),
        }
    }
}

#[async_trait]
impl ObjectStore for RestStore {
    async fn get(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
        name: &str,
    ) -> StoreResult<DynamicObject> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        if path.namespaced && namespace.is_none() {
            return Err(StoreError::NotFound {
                kind: path.gvk().group_kind().to_string(),
                name: name.to_string(),
            });
        }
        let obj = self
            .api(path, namespace)
            .get(name)
            .await
            .map_err(|e| api_error(e, "get", path, Some(name)))?;
        Ok(obj.with_type_meta(path.api_version(), path.kind()))
    }

    async fn list(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<DynamicObject>> {
        let list = self
            .api(path, namespace.filter(|ns| !ns.is_empty()))
            .list(&ListParams::default())
            .await
            .map_err(|e| api_error(e, "list", path, None))?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| obj.with_type_meta(path.api_version(), path.kind()))
            .collect())
    }

    async fn watch(&self, path: &ResourcePath) -> StoreResult<WatchStream> {
        debug!(kind = %path.gvk(), "Watch opened");
        let api = Api::<DynamicObject>::all_with(self.client.clone(), &path.resource);
        let path = path.clone();
        let events = watcher(api, watcher::Config::default())
            .default_backoff()
            .map_ok({
                let path = path.clone();
                move |event| typed_event(event, &path)
            })
            .map_err(move |e| watch_error(e, &path));
        Ok(events.boxed())
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Discovers served kinds with the gateway's own identity.
pub struct RestDiscovery {
    client: Client,
}

/// Resource paths of one discovered group, every served version included.
fn group_paths(group: &discovery::ApiGroup) -> Vec<ResourcePath> {
    group
        .versions()
        .flat_map(|version| group.versioned_resources(version))
        .map(|(resource, caps)| resource_path(resource, &caps))
        .collect()
}

fn resource_path(resource: ApiResource, caps: &ApiCapabilities) -> ResourcePath {
    ResourcePath::new(resource, caps.scope == Scope::Namespaced)
}

#[async_trait]
impl Discovery for RestDiscovery {
    async fn discover(&self) -> StoreResult<TypeMap> {
        let transport = |e: kube::Error| StoreError::Transport {
            reason: format!("discovery failed: {}", e),
        };
        let mut map = TypeMap::new();

        let core = discovery::group(&self.client, "").await.map_err(transport)?;
        for path in group_paths(&core) {
            map.insert(path);
        }

        // Aggregated APIs are often unavailable; skip them rather than fail.
        let groups = self.client.list_api_groups().await.map_err(transport)?;
        for group in groups.groups {
            match discovery::group(&self.client, &group.name).await {
                Ok(discovered) => {
                    for path in group_paths(&discovered) {
                        map.insert(path);
                    }
                }
                Err(e) => warn!(group = %group.name, error = %e, "Skipping unavailable group"),
            }
        }

        Ok(map)
    }
}
