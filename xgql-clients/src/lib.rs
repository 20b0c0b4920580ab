//! xgql Clients - Identity-Scoped Store Access
//!
//! Object store abstraction with an in-memory and an API server backend,
//! the shared type mapper, per-identity selectively caching clients, and the
//! process-wide client cache that hands them out.

pub mod cache;
pub mod mapper;
pub mod memory;
pub mod rest;
pub mod selective;
pub mod store;

pub use cache::{CacheMetrics, CacheMetricsSnapshot, ClientCache};
pub use mapper::{SharedTypeMapper, TypeMap};
pub use memory::{builtin_paths, MemoryCluster, MemoryStore, Verb};
pub use rest::{RestConfig, RestConnector, RestDiscovery, RestStore};
pub use selective::{ClientOptions, KindPhase, SelectiveCachingClient};
pub use store::{Discovery, ObjectStore, StoreConnector, StoreResult, WatchStream};
