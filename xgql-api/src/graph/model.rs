//! View models.
//!
//! Decoding a stored object into a view model is a pure function of the
//! object: no client, no context. Well-known Crossplane and Kubernetes kinds
//! decode into typed models; everything else decodes into
//! [`GenericResource`], which keeps `spec` and `status` as JSON.

use std::collections::BTreeMap;

use async_graphql::{Enum, Json, OutputType, SimpleObject, Union, ID};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use xgql_core::{DynamicObject, GroupVersionKind, ObjectExt, ObjectReference};

pub const PKG_GROUP: &str = "pkg.crossplane.io";
pub const CRD_GROUP: &str = "apiextensions.k8s.io";
pub const CRD_KIND: &str = "CustomResourceDefinition";

pub fn provider_gvk() -> GroupVersionKind {
    GroupVersionKind::new(PKG_GROUP, "v1", "Provider")
}

pub fn provider_revision_gvk() -> GroupVersionKind {
    GroupVersionKind::new(PKG_GROUP, "v1", "ProviderRevision")
}

pub fn crd_gvk() -> GroupVersionKind {
    GroupVersionKind::new(CRD_GROUP, "v1", CRD_KIND)
}

pub fn event_gvk() -> GroupVersionKind {
    GroupVersionKind::new("", "v1", "Event")
}

/// Whether a reference points at a CustomResourceDefinition. Versions are
/// not compared.
pub fn is_crd_reference(reference: &ObjectReference) -> bool {
    reference.kind == CRD_KIND && reference.group() == CRD_GROUP
}

// ============================================================================
// REFERENCE ID
// ============================================================================

/// Malformed `ID` argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource id: {reason}")]
pub struct InvalidReferenceId {
    pub reason: String,
}

/// Stable identifier of a stored object, opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceId {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ReferenceId {
    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            namespace: obj.metadata.namespace.clone(),
            name: obj.name().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let plain = format!(
            "{}|{}|{}|{}",
            self.api_version,
            self.kind,
            self.namespace.as_deref().unwrap_or(""),
            self.name
        );
        STANDARD_NO_PAD.encode(plain)
    }

    pub fn decode(id: &str) -> Result<Self, InvalidReferenceId> {
        let invalid = |reason: &str| InvalidReferenceId {
            reason: reason.to_string(),
        };
        let bytes = STANDARD_NO_PAD
            .decode(id.trim_end_matches('='))
            .map_err(|_| invalid("not base64"))?;
        let plain = String::from_utf8(bytes).map_err(|_| invalid("not UTF-8"))?;
        let parts: Vec<&str> = plain.splitn(4, '|').collect();
        match parts.as_slice() {
            [api_version, kind, namespace, name]
                if !api_version.is_empty() && !kind.is_empty() && !name.is_empty() =>
            {
                Ok(Self {
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                    namespace: Some(namespace.to_string()).filter(|ns| !ns.is_empty()),
                    name: name.to_string(),
                })
            }
            _ => Err(invalid("expected apiVersion, kind, namespace and name")),
        }
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            uid: None,
        }
    }
}

fn id_of(obj: &DynamicObject) -> ID {
    ID(ReferenceId::of(obj).encode())
}

/// Decode part of an object's body, ignoring anything malformed.
fn section<T: DeserializeOwned>(obj: &DynamicObject, path: &[&str]) -> Option<T> {
    obj.field(path)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A list of related objects. `total_count` always equals the number of
/// nodes: only objects that were fetched and passed every filter are counted.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(concrete(name = "ProviderConnection", params(Provider)))]
#[graphql(concrete(name = "ProviderRevisionConnection", params(ProviderRevision)))]
#[graphql(concrete(
    name = "CustomResourceDefinitionConnection",
    params(CustomResourceDefinition)
))]
#[graphql(concrete(name = "EventConnection", params(Event)))]
#[graphql(concrete(name = "KubernetesResourceConnection", params(KubernetesResource)))]
#[graphql(concrete(name = "OwnerConnection", params(Owner)))]
pub struct Connection<T: OutputType> {
    pub nodes: Vec<T>,
    pub total_count: i32,
}

impl<T: OutputType> Connection<T> {
    pub fn from_nodes(nodes: Vec<T>) -> Self {
        let total_count = i32::try_from(nodes.len()).unwrap_or(i32::MAX);
        Self { nodes, total_count }
    }
}

impl<T: OutputType> FromIterator<T> for Connection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_nodes(iter.into_iter().collect())
    }
}

// ============================================================================
// SHARED STRUCTURES
// ============================================================================

/// Standard object metadata.
#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct ObjectMeta {
    pub name: String,
    pub generate_name: Option<String>,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub generation: Option<i64>,
    pub creation_time: Option<DateTime<Utc>>,
    pub deletion_time: Option<DateTime<Utc>>,
    pub labels: Json<BTreeMap<String, String>>,
    pub annotations: Json<BTreeMap<String, String>>,
    pub owner_references: Vec<OwnerReference>,
}

impl From<&xgql_core::ObjectMeta> for ObjectMeta {
    fn from(meta: &xgql_core::ObjectMeta) -> Self {
        Self {
            name: meta.name.clone().unwrap_or_default(),
            generate_name: meta.generate_name.clone(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
            generation: meta.generation,
            creation_time: meta.creation_timestamp.as_ref().map(|t| t.0),
            deletion_time: meta.deletion_timestamp.as_ref().map(|t| t.0),
            labels: Json(meta.labels.clone().unwrap_or_default()),
            annotations: Json(meta.annotations.clone().unwrap_or_default()),
            owner_references: meta
                .owner_references
                .iter()
                .flatten()
                .map(OwnerReference::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, SimpleObject)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

impl From<&xgql_core::OwnerReference> for OwnerReference {
    fn from(owner: &xgql_core::OwnerReference) -> Self {
        Self {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            controller: xgql_core::is_controller(owner),
            block_owner_deletion: owner.block_owner_deletion.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A status condition.
#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct Condition {
    #[graphql(name = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
    reason: Option<String>,
    message: Option<String>,
    last_transition_time: Option<DateTime<Utc>>,
}

impl From<RawCondition> for Condition {
    fn from(raw: RawCondition) -> Self {
        let status = match raw.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        Self {
            condition_type: raw.condition_type,
            status,
            reason: raw.reason.filter(|r| !r.is_empty()),
            message: raw.message.filter(|m| !m.is_empty()),
            last_transition_time: raw.last_transition_time,
        }
    }
}

fn conditions(obj: &DynamicObject) -> Vec<Condition> {
    let Some(Value::Array(items)) = obj.field(&["status", "conditions"]) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<RawCondition>(item.clone()).ok())
        .map(Condition::from)
        .collect()
}

// ============================================================================
// PROVIDER
// ============================================================================

/// A Crossplane provider package.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct Provider {
    pub id: ID,
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ProviderSpec,
    pub status: Option<ProviderStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSpec {
    pub package: String,
    pub revision_activation_policy: Option<String>,
    pub revision_history_limit: Option<i64>,
    pub package_pull_policy: Option<String>,
    pub ignore_crossplane_constraints: Option<bool>,
    pub skip_dependency_resolution: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderStatus {
    #[serde(skip)]
    pub conditions: Vec<Condition>,
    pub current_revision: Option<String>,
    pub current_identifier: Option<String>,
}

impl From<&DynamicObject> for Provider {
    fn from(obj: &DynamicObject) -> Self {
        Self {
            id: id_of(obj),
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            metadata: ObjectMeta::from(&obj.metadata),
            spec: section(obj, &["spec"]).unwrap_or_default(),
            status: section::<ProviderStatus>(obj, &["status"]).map(|status| ProviderStatus {
                conditions: conditions(obj),
                ..status
            }),
        }
    }
}

// ============================================================================
// PROVIDER REVISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum PackageRevisionDesiredState {
    Active,
    Inactive,
}

/// One installed revision of a provider package.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct ProviderRevision {
    pub id: ID,
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ProviderRevisionSpec,
    pub status: Option<ProviderRevisionStatus>,
}

#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct ProviderRevisionSpec {
    pub desired_state: Option<PackageRevisionDesiredState>,
    pub package: String,
    pub revision: i64,
    pub package_pull_policy: Option<String>,
    pub ignore_crossplane_constraints: Option<bool>,
    pub skip_dependency_resolution: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRevisionSpec {
    desired_state: String,
    package: String,
    revision: i64,
    package_pull_policy: Option<String>,
    ignore_crossplane_constraints: Option<bool>,
    skip_dependency_resolution: Option<bool>,
}

/// Revision status. `objects` dereferences the installed object references.
#[derive(Debug, Clone, PartialEq, SimpleObject)]
#[graphql(complex)]
pub struct ProviderRevisionStatus {
    pub conditions: Vec<Condition>,
    pub found_dependencies: Option<i64>,
    pub installed_dependencies: Option<i64>,
    pub invalid_dependencies: Option<i64>,
    #[graphql(skip)]
    pub object_refs: Vec<ObjectReference>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRevisionStatus {
    found_dependencies: Option<i64>,
    installed_dependencies: Option<i64>,
    invalid_dependencies: Option<i64>,
    object_refs: Vec<ObjectReference>,
}

/// Whether a raw revision asks to be the active one.
pub fn is_active_revision(obj: &DynamicObject) -> bool {
    obj.str_field(&["spec", "desiredState"]) == Some("Active")
}

impl From<&DynamicObject> for ProviderRevision {
    fn from(obj: &DynamicObject) -> Self {
        let spec: RawRevisionSpec = section(obj, &["spec"]).unwrap_or_default();
        let desired_state = match spec.desired_state.as_str() {
            "Active" => Some(PackageRevisionDesiredState::Active),
            "Inactive" => Some(PackageRevisionDesiredState::Inactive),
            _ => None,
        };
        Self {
            id: id_of(obj),
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            metadata: ObjectMeta::from(&obj.metadata),
            spec: ProviderRevisionSpec {
                desired_state,
                package: spec.package,
                revision: spec.revision,
                package_pull_policy: spec.package_pull_policy,
                ignore_crossplane_constraints: spec.ignore_crossplane_constraints,
                skip_dependency_resolution: spec.skip_dependency_resolution,
            },
            status: section::<RawRevisionStatus>(obj, &["status"]).map(|status| {
                ProviderRevisionStatus {
                    conditions: conditions(obj),
                    found_dependencies: status.found_dependencies,
                    installed_dependencies: status.installed_dependencies,
                    invalid_dependencies: status.invalid_dependencies,
                    object_refs: status.object_refs,
                }
            }),
        }
    }
}

// ============================================================================
// CUSTOM RESOURCE DEFINITION
// ============================================================================

#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct CustomResourceDefinition {
    pub id: ID,
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: CustomResourceDefinitionSpec,
    pub status: Option<CustomResourceDefinitionStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomResourceDefinitionSpec {
    pub group: String,
    pub names: CustomResourceDefinitionNames,
    pub scope: String,
    pub versions: Vec<CustomResourceDefinitionVersion>,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomResourceDefinitionNames {
    pub plural: String,
    pub singular: Option<String>,
    pub kind: String,
    pub list_kind: Option<String>,
    pub short_names: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomResourceDefinitionVersion {
    pub name: String,
    pub served: bool,
    pub storage: bool,
    pub deprecated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct CustomResourceDefinitionStatus {
    pub conditions: Vec<Condition>,
    pub stored_versions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCrdStatus {
    stored_versions: Vec<String>,
}

impl From<&DynamicObject> for CustomResourceDefinition {
    fn from(obj: &DynamicObject) -> Self {
        Self {
            id: id_of(obj),
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            metadata: ObjectMeta::from(&obj.metadata),
            spec: section(obj, &["spec"]).unwrap_or_default(),
            status: section::<RawCrdStatus>(obj, &["status"]).map(|status| {
                CustomResourceDefinitionStatus {
                    conditions: conditions(obj),
                    stored_versions: status.stored_versions,
                }
            }),
        }
    }
}

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum EventType {
    Normal,
    Warning,
}

/// A Kubernetes event about another object.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct Event {
    pub id: ID,
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[graphql(name = "type")]
    pub event_type: Option<EventType>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub source: Option<EventSource>,
    pub count: Option<i64>,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    #[graphql(skip)]
    pub involved_object_ref: ObjectReference,
}

#[derive(Debug, Clone, PartialEq, Default, SimpleObject, Deserialize)]
#[serde(default)]
pub struct EventSource {
    pub component: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEvent {
    involved_object: ObjectReference,
    #[serde(rename = "type")]
    event_type: Option<String>,
    reason: Option<String>,
    message: Option<String>,
    source: Option<EventSource>,
    count: Option<i64>,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// UID of the object an event is about.
pub fn involved_uid(obj: &DynamicObject) -> Option<&str> {
    obj.str_field(&["involvedObject", "uid"])
}

impl From<&DynamicObject> for Event {
    fn from(obj: &DynamicObject) -> Self {
        let raw: RawEvent = serde_json::from_value(obj.data.clone()).unwrap_or_default();
        let event_type = match raw.event_type.as_deref() {
            Some("Normal") => Some(EventType::Normal),
            Some("Warning") => Some(EventType::Warning),
            _ => None,
        };
        Self {
            id: id_of(obj),
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            metadata: ObjectMeta::from(&obj.metadata),
            event_type,
            reason: raw.reason,
            message: raw.message,
            source: raw.source,
            count: raw.count,
            first_time: raw.first_timestamp,
            last_time: raw.last_timestamp,
            involved_object_ref: raw.involved_object,
        }
    }
}

// ============================================================================
// GENERIC RESOURCE
// ============================================================================

/// Any object without a dedicated model.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct GenericResource {
    pub id: ID,
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: Option<Json<Value>>,
    pub status: Option<Json<Value>>,
    #[graphql(skip)]
    pub owner_refs: Vec<xgql_core::OwnerReference>,
}

impl From<&DynamicObject> for GenericResource {
    fn from(obj: &DynamicObject) -> Self {
        Self {
            id: id_of(obj),
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            metadata: ObjectMeta::from(&obj.metadata),
            spec: obj.field(&["spec"]).cloned().map(Json),
            status: obj.field(&["status"]).cloned().map(Json),
            owner_refs: obj.owners().to_vec(),
        }
    }
}

// ============================================================================
// KUBERNETES RESOURCE
// ============================================================================

/// Any stored object, typed where a model exists.
#[derive(Debug, Clone, Union)]
pub enum KubernetesResource {
    Provider(Provider),
    ProviderRevision(ProviderRevision),
    CustomResourceDefinition(CustomResourceDefinition),
    Event(Event),
    GenericResource(GenericResource),
}

impl KubernetesResource {
    /// Pick the model by group and kind. Versions are not consulted.
    pub fn decode(obj: &DynamicObject) -> Self {
        let gvk = obj.gvk();
        match (gvk.group.as_str(), gvk.kind.as_str()) {
            (PKG_GROUP, "Provider") => KubernetesResource::Provider(Provider::from(obj)),
            (PKG_GROUP, "ProviderRevision") => {
                KubernetesResource::ProviderRevision(ProviderRevision::from(obj))
            }
            (CRD_GROUP, CRD_KIND) => {
                KubernetesResource::CustomResourceDefinition(CustomResourceDefinition::from(obj))
            }
            ("", "Event") | ("events.k8s.io", "Event") => KubernetesResource::Event(Event::from(obj)),
            _ => KubernetesResource::GenericResource(GenericResource::from(obj)),
        }
    }
}

/// An owner of a resource.
#[derive(Debug, Clone, SimpleObject)]
pub struct Owner {
    pub controller: bool,
    pub resource: KubernetesResource,
}
