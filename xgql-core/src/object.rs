//! Objects as served by the store.
//!
//! The wire types are `kube`'s [`DynamicObject`] and the `k8s-openapi`
//! metadata types; [`ObjectExt`] adds the accessors resolvers and the caching
//! layer need on top of them.

use serde_json::Value;

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
pub use kube::core::{DynamicObject, TypeMeta};

use crate::reference::{GroupVersionKind, ObjectKey, ObjectReference};

/// Whether an owner reference is flagged as the controller.
pub fn is_controller(owner: &OwnerReference) -> bool {
    owner.controller.unwrap_or(false)
}

/// Accessors over [`DynamicObject`].
pub trait ObjectExt {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn gvk(&self) -> GroupVersionKind;
    /// `metadata.name`, empty when unset.
    fn name(&self) -> &str;
    fn key(&self) -> ObjectKey;
    fn uid(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn owners(&self) -> &[OwnerReference];
    /// The owner reference flagged as controller, if any.
    fn controller(&self) -> Option<&OwnerReference>;
    /// True when this object's controller reference points at `uid`.
    fn is_controlled_by(&self, uid: &str) -> bool;
    fn reference(&self) -> ObjectReference;
    /// Walk nested body fields, e.g. `["status", "objectRefs"]`.
    fn field(&self, path: &[&str]) -> Option<&Value>;
    fn str_field(&self, path: &[&str]) -> Option<&str>;
    /// Fill in type metadata that list responses omit from their items.
    fn with_type_meta(self, api_version: &str, kind: &str) -> Self;
}

impl ObjectExt for DynamicObject {
    fn api_version(&self) -> &str {
        self.types
            .as_ref()
            .map(|t| t.api_version.as_str())
            .unwrap_or("")
    }

    fn kind(&self) -> &str {
        self.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("")
    }

    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.name())
    }

    fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    fn owners(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or_default()
    }

    fn controller(&self) -> Option<&OwnerReference> {
        self.owners().iter().find(|o| is_controller(o))
    }

    fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller()
            .map(|owner| owner.uid == uid)
            .unwrap_or(false)
    }

    fn reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            namespace: self.metadata.namespace.clone(),
            uid: self.metadata.uid.clone(),
        }
    }

    fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(*first)?;
        for segment in rest {
            current = current.get(*segment)?;
        }
        Some(current)
    }

    fn str_field(&self, path: &[&str]) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    fn with_type_meta(mut self, api_version: &str, kind: &str) -> Self {
        let types = self.types.get_or_insert_with(|| TypeMeta {
            api_version: String::new(),
            kind: String::new(),
        });
        if types.api_version.is_empty() {
            types.api_version = api_version.to_string();
        }
        if types.kind.is_empty() {
            types.kind = kind.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revision() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "pkg.crossplane.io/v1",
            "kind": "ProviderRevision",
            "metadata": {
                "name": "provider-aws-abc123",
                "uid": "rev-uid",
                "resourceVersion": "17",
                "creationTimestamp": "2024-01-02T03:04:05Z",
                "ownerReferences": [
                    {"apiVersion": "pkg.crossplane.io/v1", "kind": "Provider", "name": "provider-aws", "uid": "p-uid", "controller": true},
                    {"apiVersion": "v1", "kind": "ConfigMap", "name": "other", "uid": "cm-uid"}
                ]
            },
            "spec": {"desiredState": "Active", "revision": 3},
            "status": {"objectRefs": [{"apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition", "name": "vpcs.ec2.aws.crossplane.io"}]}
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_keeps_body() {
        let obj = revision();
        assert_eq!(obj.kind(), "ProviderRevision");
        assert_eq!(obj.resource_version(), Some("17"));
        assert_eq!(obj.str_field(&["spec", "desiredState"]), Some("Active"));
        assert!(obj.field(&["status", "objectRefs"]).is_some());
        assert!(obj.field(&["status", "missing"]).is_none());
        assert!(obj.field(&[]).is_none());
        assert!(obj.metadata.creation_timestamp.is_some());
    }

    #[test]
    fn test_controller_reference() {
        let obj = revision();
        assert_eq!(obj.controller().map(|o| o.name.as_str()), Some("provider-aws"));
        assert_eq!(obj.owners().len(), 2);
        assert!(obj.is_controlled_by("p-uid"));
        // Non-controller owners do not count.
        assert!(!obj.is_controlled_by("cm-uid"));
    }

    #[test]
    fn test_serialize_round_trips_body() {
        let obj = revision();
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["spec"]["revision"], json!(3));
        assert_eq!(value["metadata"]["ownerReferences"][0]["controller"], json!(true));
    }

    #[test]
    fn test_with_type_meta_only_fills_missing() {
        let bare: DynamicObject =
            serde_json::from_value(json!({"metadata": {"name": "a"}})).unwrap();
        let filled = bare.with_type_meta("v1", "Event");
        assert_eq!(filled.api_version(), "v1");
        assert_eq!(filled.kind(), "Event");

        let kept = revision().with_type_meta("v1", "Event");
        assert_eq!(kept.kind(), "ProviderRevision");
    }

    #[test]
    fn test_reference_and_key() {
        let obj = revision();
        let r = obj.reference();
        assert_eq!(r.uid.as_deref(), Some("rev-uid"));
        assert_eq!(obj.key(), ObjectKey::cluster("provider-aws-abc123"));
        assert_eq!(obj.gvk().group, "pkg.crossplane.io");
    }

    #[test]
    fn test_unnamed_object_has_empty_name() {
        let obj: DynamicObject = serde_json::from_value(json!({"metadata": {}})).unwrap();
        assert_eq!(obj.name(), "");
        assert!(obj.owners().is_empty());
        assert!(obj.controller().is_none());
    }
}
