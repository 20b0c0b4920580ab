//! Object store abstraction.
//!
//! An [`ObjectStore`] is bound to one caller's credentials; a
//! [`StoreConnector`] builds one per identity, and [`Discovery`] reports
//! which kinds the store serves.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use kube::runtime::watcher;
use xgql_core::{Credentials, DynamicObject, ResourcePath, StoreError};

use crate::mapper::TypeMap;

/// Result type for raw store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Watch events for one kind across all namespaces, in the `kube` watcher
/// protocol: every (re)list arrives as `Init`, `InitApply`.., `InitDone`,
/// followed by `Apply` and `Delete` changes. Errors are yielded in line; the
/// stream may retry after one or end, and an ended stream is watched again.
pub type WatchStream = BoxStream<'static, StoreResult<watcher::Event<DynamicObject>>>;

/// Read access to the store with one identity's credentials.
///
/// `namespace` is ignored for cluster scoped kinds; `None` lists across all
/// namespaces.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a single object.
    async fn get(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
        name: &str,
    ) -> StoreResult<DynamicObject>;

    /// List every object of a kind.
    async fn list(
        &self,
        path: &ResourcePath,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<DynamicObject>>;

    /// Follow a kind. Fails up front when the kind cannot be watched at all.
    async fn watch(&self, path: &ResourcePath) -> StoreResult<WatchStream>;
}

/// Builds [`ObjectStore`]s bound to caller credentials.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Fails with [`StoreError::Invalid`] for malformed credentials.
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn ObjectStore>>;
}

/// Reports the kinds the store currently serves.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> StoreResult<TypeMap>;
}
