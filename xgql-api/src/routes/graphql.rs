//! GraphQL endpoint and playground.

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::debug;

use super::AppState;
use crate::deadline::RequestDeadline;
use crate::middleware::CredentialsExtractor;

/// Execute one GraphQL request with the caller's credentials and a fresh
/// request budget.
pub async fn graphql_handler(
    State(state): State<AppState>,
    CredentialsExtractor(credentials): CredentialsExtractor,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let identity = state.cache.anonymizer().anonymize(&credentials);
    debug!(identity = %identity.short(), "Executing query");

    let request = req
        .into_inner()
        .data(credentials)
        .data(RequestDeadline::after(state.config.request_timeout));
    state.schema.execute(request).await.into()
}

/// Handler for GraphiQL playground.
pub async fn playground() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/query").finish())
}
