//! Type and object addressing: kinds, resource paths and references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use kube::core::ApiResource;

use crate::error::ConfigError;
use crate::object::OwnerReference;

/// Group, version and kind of an object, as carried by `apiVersion`/`kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` such as `apps/v1` or `v1` (the core group).
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// A kind without its version. Caching policy is decided per group kind.
///
/// The textual form is `Kind` for the core group and `Kind.group` otherwise,
/// e.g. `Deployment.apps`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    pub fn core(kind: impl Into<String>) -> Self {
        Self::new("", kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

impl FromStr for GroupKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, group) = match s.split_once('.') {
            Some((kind, group)) => (kind, group),
            None => (s, ""),
        };
        let valid_kind = kind
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
            && kind.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_kind || group.starts_with('.') || group.ends_with('.') {
            return Err(ConfigError::InvalidValue {
                field: "kind".to_string(),
                value: s.to_string(),
                reason: "expected Kind or Kind.group, e.g. Deployment.apps".to_string(),
            });
        }
        Ok(Self::new(group, kind))
    }
}

/// Where a kind is served: the API resource discovery resolved it to, and
/// whether its objects live in namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl ResourcePath {
    pub fn new(resource: ApiResource, namespaced: bool) -> Self {
        Self {
            resource,
            namespaced,
        }
    }

    /// A path for a kind served under `plural`, e.g. `providerrevisions`.
    pub fn for_kind(gvk: &GroupVersionKind, plural: &str, namespaced: bool) -> Self {
        let gvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        Self::new(ApiResource::from_gvk_with_plural(&gvk, plural), namespaced)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(
            self.resource.group.clone(),
            self.resource.version.clone(),
            self.resource.kind.clone(),
        )
    }

    pub fn api_version(&self) -> &str {
        &self.resource.api_version
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    pub fn plural(&self) -> &str {
        &self.resource.plural
    }
}

/// Namespace and name; the identity of an object within one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new(None, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A handle to another object. Dereferencing it may fail without affecting
/// the object that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(&self.api_version, &self.kind)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Group portion of `apiVersion`; empty for the core group.
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    /// Reference an owner. Owners of namespaced objects live in the same
    /// namespace or are cluster scoped; the client drops the namespace for
    /// cluster scoped kinds.
    pub fn from_owner(owner: &OwnerReference, namespace: Option<&str>) -> Self {
        Self {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            namespace: namespace.map(str::to_string),
            uid: Some(owner.uid.clone()),
        }
    }
}
