//! HTTP Routes
//!
//! - POST /query - GraphQL endpoint (credential headers required to be well formed)
//! - GET / - GraphiQL playground (when enabled)
//! - GET /healthz - liveness
//! - GET /version - build information

pub mod graphql;
pub mod health;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use xgql_clients::ClientCache;

use crate::config::ApiConfig;
use crate::graph::XgqlSchema;
use crate::middleware::{credentials_middleware, IMPERSONATE_GROUP, IMPERSONATE_USER};

// ============================================================================
// STATE
// ============================================================================

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub schema: XgqlSchema,
    pub cache: Arc<ClientCache>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(schema: XgqlSchema, cache: Arc<ClientCache>, config: ApiConfig) -> Self {
        Self {
            schema,
            cache,
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(IMPERSONATE_USER),
            HeaderName::from_static(IMPERSONATE_GROUP),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: allowing configured origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the gateway router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let mut router = Router::new()
        .route(
            "/query",
            post(graphql::graphql_handler)
                .layer(middleware::from_fn(credentials_middleware)),
        )
        .route("/healthz", get(health::healthz))
        .route("/version", get(health::version));

    if state.config.enable_playground {
        router = router.route("/", get(graphql::playground));
    }

    router
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
