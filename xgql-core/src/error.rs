//! Error types for xgql operations

use thiserror::Error;

/// Raw outcomes of a call against the object store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("forbidden: cannot {verb} {kind}: {reason}")]
    Forbidden {
        verb: String,
        kind: String,
        reason: String,
    },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("no resource is served for kind {kind}")]
    KindUnknown { kind: String },

    #[error("resource version {resource_version} is too old")]
    Gone { resource_version: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("decode error: {reason}")]
    Decode { reason: String },

    #[error("invalid request: {reason}")]
    Invalid { reason: String },
}

/// Errors surfaced by identity-scoped clients to resolvers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("cannot construct client: {reason}")]
    ClientConstructionFailed { reason: String },

    #[error("unknown kind {kind}")]
    KindUnknown { kind: String },

    #[error("forbidden: {kind}: {reason}")]
    Forbidden { kind: String, reason: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("watch failed for {kind}: {reason}")]
    WatchFailed { kind: String, reason: String },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("request cancelled")]
    Cancelled,

    #[error("object store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl ClientError {
    /// Machine readable code attached to GraphQL field errors.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::ClientConstructionFailed { .. } => "CLIENT_CONSTRUCTION_FAILED",
            ClientError::KindUnknown { .. } => "KIND_UNKNOWN",
            ClientError::Forbidden { .. } => "FORBIDDEN",
            ClientError::NotFound { .. } => "NOT_FOUND",
            ClientError::WatchFailed { .. } => "WATCH_FAILED",
            ClientError::Unauthorized { .. } => "UNAUTHENTICATED",
            ClientError::Timeout { .. } => "TIMEOUT",
            ClientError::Cancelled => "CANCELLED",
            ClientError::Unavailable { .. } => "UNAVAILABLE",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, name } => ClientError::NotFound { kind, name },
            StoreError::Forbidden { kind, reason, .. } => ClientError::Forbidden { kind, reason },
            StoreError::Unauthorized { reason } => ClientError::Unauthorized { reason },
            StoreError::KindUnknown { kind } => ClientError::KindUnknown { kind },
            StoreError::Invalid { reason } => ClientError::ClientConstructionFailed { reason },
            other @ (StoreError::Gone { .. }
            | StoreError::Transport { .. }
            | StoreError::Decode { .. }) => ClientError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all xgql errors.
#[derive(Debug, Clone, Error)]
pub enum XgqlError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for xgql operations.
pub type XgqlResult<T> = Result<T, XgqlError>;

// =============================================================================
// TESTS
// =============================================================================
