//! API Configuration Module
//!
//! HTTP surface settings: bind address, playground, request budget, CORS,
//! and which object store backs the gateway. Loaded from environment
//! variables with defaults suitable for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use xgql_core::ConfigError;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

/// Which object store the gateway talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// The Kubernetes API server.
    Rest,
    /// An in-memory cluster, optionally seeded from a YAML file.
    Memory { fixtures: Option<PathBuf> },
}

/// API configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Address to serve on.
    pub listen: SocketAddr,

    /// Serve the GraphiQL playground at `/`.
    pub enable_playground: bool,

    /// Budget for one GraphQL request. Downstream calls never outlive it.
    pub request_timeout: Duration,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    pub store: StoreBackend,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_playground: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            store: StoreBackend::Rest,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `XGQL_LISTEN`: Bind address (default: 127.0.0.1:8080)
    /// - `XGQL_ENABLE_PLAYGROUND`: "true" serves GraphiQL at `/` (default: false)
    /// - `XGQL_REQUEST_TIMEOUT_SECS`: Per-request budget (default: 10)
    /// - `XGQL_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `XGQL_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `XGQL_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `XGQL_STORE`: "rest" or "memory" (default: rest)
    /// - `XGQL_FIXTURES`: YAML objects to load into the memory store
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen = match lookup("XGQL_LISTEN") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                field: "XGQL_LISTEN".to_string(),
                value,
                reason: "expected host:port".to_string(),
            })?,
            None => defaults.listen,
        };

        let enable_playground = lookup("XGQL_ENABLE_PLAYGROUND")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.enable_playground);

        let request_timeout = lookup("XGQL_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let cors_origins = lookup("XGQL_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = lookup("XGQL_CORS_ALLOW_CREDENTIALS")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.cors_allow_credentials);

        let cors_max_age_secs = lookup("XGQL_CORS_MAX_AGE_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let store_kind = lookup("XGQL_STORE").map(|s| s.to_lowercase());
        let store = match store_kind.as_deref() {
            None | Some("rest") => StoreBackend::Rest,
            Some("memory") => StoreBackend::Memory {
                fixtures: lookup("XGQL_FIXTURES").map(PathBuf::from),
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "XGQL_STORE".to_string(),
                    value: other.to_string(),
                    reason: "expected rest or memory".to_string(),
                })
            }
        };

        let config = Self {
            listen,
            enable_playground,
            request_timeout,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            store,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "XGQL_REQUEST_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.cors_allow_credentials && self.cors_origins.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "XGQL_CORS_ALLOW_CREDENTIALS".to_string(),
                value: "true".to_string(),
                reason: "requires explicit XGQL_CORS_ORIGINS".to_string(),
            });
        }
        Ok(())
    }

    /// Check if running with a strict CORS policy.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}
