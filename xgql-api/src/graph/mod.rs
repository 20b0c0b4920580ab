//! GraphQL schema over identity-scoped clients.
//!
//! Every request carries the caller's [`Credentials`](xgql_core::Credentials)
//! and a [`RequestDeadline`](crate::deadline::RequestDeadline) as request
//! data. Resolvers fetch through the caller's own client only; a failure in
//! one field never fails its siblings or its parent.

pub mod context;
pub mod model;
pub mod query;
mod relations;

use std::sync::Arc;
use std::time::Duration;

use async_graphql::{EmptyMutation, EmptySubscription, Schema};
use xgql_clients::ClientCache;

pub use context::{field_error, Gateway};
pub use model::{Connection, KubernetesResource, ReferenceId};
pub use query::Query;

pub type XgqlSchema = Schema<Query, EmptyMutation, EmptySubscription>;

/// Build the schema around a process-wide client cache.
pub fn build_schema(
    cache: Arc<ClientCache>,
    call_timeout: Duration,
    request_timeout: Duration,
) -> XgqlSchema {
    Schema::build(Query, EmptyMutation, EmptySubscription)
        .data(Gateway {
            cache,
            call_timeout,
            request_timeout,
        })
        .finish()
}
