//! xgql Telemetry - Logging Infrastructure
//!
//! Structured logging through `tracing`, filtered by `RUST_LOG`.

pub mod tracer;

pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
