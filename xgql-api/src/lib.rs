//! xgql API - GraphQL Gateway Layer
//!
//! Serves a GraphQL query surface over Kubernetes and Crossplane objects.
//! Each request is resolved with a client scoped to the caller's own
//! credentials, handed out by the process-wide
//! [`ClientCache`](xgql_clients::ClientCache). Responses may be partial:
//! fields whose downstream calls fail are null, with path-scoped errors.

pub mod config;
pub mod deadline;
pub mod error;
pub mod graph;
pub mod middleware;
pub mod routes;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ApiConfig, StoreBackend};
pub use deadline::RequestDeadline;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use graph::{build_schema, Gateway, XgqlSchema};
pub use middleware::{credentials_from_headers, credentials_middleware, CredentialsExtractor};
pub use routes::{create_router, AppState};
