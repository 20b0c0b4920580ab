//! xgql Core - Domain Types
//!
//! Object model, caller identities, configuration and the error taxonomy
//! shared by the client layer and the GraphQL gateway. No I/O happens here.

pub mod config;
pub mod error;
pub mod identity;
pub mod object;
pub mod reference;

pub use config::{ExclusionSet, GatewayConfig, RefreshPolicy};
pub use error::{ClientError, ConfigError, StoreError, XgqlError, XgqlResult};
pub use identity::{Anonymizer, Credentials, IdentityKey, Impersonation};
pub use kube::core::ApiResource;
pub use object::{is_controller, DynamicObject, ObjectExt, ObjectMeta, OwnerReference, Time, TypeMeta};
pub use reference::{GroupKind, GroupVersionKind, ObjectKey, ObjectReference, ResourcePath};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
