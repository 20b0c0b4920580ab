//! Axum Middleware for Caller Credentials
//!
//! This module turns request headers into [`Credentials`]:
//! - `Authorization: Bearer <token>` supplies the bearer token
//! - `Impersonate-User`, `Impersonate-Group` (repeatable) and
//!   `Impersonate-Extra-<key>` (repeatable) describe an impersonated principal
//! - A request without any of these headers is anonymous
//!
//! Malformed headers are rejected with 400 before any GraphQL execution. The
//! gateway never validates a token itself; the object store does that on
//! every call made with it.

use std::collections::BTreeMap;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use xgql_core::{Credentials, Impersonation};

use crate::error::ApiError;

pub const IMPERSONATE_USER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP: &str = "impersonate-group";
pub const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

// ============================================================================
// HEADER PARSING
// ============================================================================

fn header_str<'a>(name: &str, value: &'a HeaderValue) -> Result<&'a str, ApiError> {
    value
        .to_str()
        .map_err(|_| ApiError::invalid_credentials(name, "value is not visible ASCII"))
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header_str("Authorization", value)?;
    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| ApiError::invalid_credentials("Authorization", "expected Bearer scheme"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiError::invalid_credentials(
            "Authorization",
            "expected Bearer scheme",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::invalid_credentials("Authorization", "empty token"));
    }
    Ok(Some(token.to_string()))
}

fn impersonation(headers: &HeaderMap) -> Result<Option<Impersonation>, ApiError> {
    let user = match headers.get(IMPERSONATE_USER) {
        Some(value) => {
            let user = header_str("Impersonate-User", value)?.trim();
            if user.is_empty() {
                return Err(ApiError::invalid_credentials(
                    "Impersonate-User",
                    "empty user",
                ));
            }
            Some(user.to_string())
        }
        None => None,
    };

    let mut groups = Vec::new();
    for value in headers.get_all(IMPERSONATE_GROUP) {
        let group = header_str("Impersonate-Group", value)?.trim();
        if group.is_empty() {
            return Err(ApiError::invalid_credentials(
                "Impersonate-Group",
                "empty group",
            ));
        }
        groups.push(group.to_string());
    }

    let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if let Some(key) = name.as_str().strip_prefix(IMPERSONATE_EXTRA_PREFIX) {
            if key.is_empty() {
                return Err(ApiError::invalid_credentials(
                    "Impersonate-Extra",
                    "missing key",
                ));
            }
            let value = header_str(name.as_str(), value)?.trim().to_string();
            extra.entry(key.to_string()).or_default().push(value);
        }
    }

    match user {
        Some(user) => Ok(Some(Impersonation {
            user,
            groups,
            extra,
        })),
        None if !groups.is_empty() => Err(ApiError::invalid_credentials(
            "Impersonate-Group",
            "requires Impersonate-User",
        )),
        None if !extra.is_empty() => Err(ApiError::invalid_credentials(
            "Impersonate-Extra",
            "requires Impersonate-User",
        )),
        None => Ok(None),
    }
}

/// Build caller credentials from request headers.
pub fn credentials_from_headers(headers: &HeaderMap) -> Result<Credentials, ApiError> {
    let token = bearer_token(headers)?;
    let impersonate = impersonation(headers)?;

    let credentials = match token {
        Some(token) => Credentials::bearer(token),
        None => Credentials::anonymous(),
    };
    Ok(match impersonate {
        Some(impersonate) => credentials.with_impersonation(impersonate),
        None => credentials,
    })
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Axum middleware that injects the caller's [`Credentials`] into request
/// extensions, or answers 400 when the credential headers are malformed.
pub async fn credentials_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = credentials_from_headers(request.headers()).inspect_err(|e| {
        debug!(error = %e, "Rejected credential headers");
    })?;
    request.extensions_mut().insert(credentials);
    Ok(next.run(request).await)
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed extractor for the caller's credentials.
///
/// Uses the value injected by [`credentials_middleware`] when present and
/// parses the headers itself otherwise.
#[derive(Debug, Clone)]
pub struct CredentialsExtractor(pub Credentials);

#[async_trait]
impl<S> FromRequestParts<S> for CredentialsExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(credentials) = parts.extensions.get::<Credentials>() {
            return Ok(CredentialsExtractor(credentials.clone()));
        }
        credentials_from_headers(&parts.headers).map(CredentialsExtractor)
    }
}

impl std::ops::Deref for CredentialsExtractor {
    type Target = Credentials;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::http::HeaderName;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_no_headers_is_anonymous() {
        let credentials = credentials_from_headers(&HeaderMap::new()).unwrap();
        assert!(credentials.is_anonymous());
    }

    #[test]
    fn test_bearer_token() {
        let credentials =
            credentials_from_headers(&headers(&[("authorization", "Bearer abc.def")])).unwrap();
        assert_eq!(credentials.bearer_token(), Some("abc.def"));
        assert!(credentials.impersonation().is_none());

        let credentials =
            credentials_from_headers(&headers(&[("authorization", "bearer xyz")])).unwrap();
        assert_eq!(credentials.bearer_token(), Some("xyz"));
    }

    #[test]
    fn test_malformed_authorization_rejected() {
        for value in ["Basic dXNlcjpwYXNz", "Bearer ", "Bearer", "token"] {
            let err = credentials_from_headers(&headers(&[("authorization", value)])).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidCredentials, "value {:?}", value);
        }
    }

    #[test]
    fn test_impersonation_headers() {
        let credentials = credentials_from_headers(&headers(&[
            ("authorization", "Bearer admin"),
            ("impersonate-user", "alice"),
            ("impersonate-group", "devs"),
            ("impersonate-group", "ops"),
            ("impersonate-extra-scopes", "view"),
            ("impersonate-extra-scopes", "edit"),
        ]))
        .unwrap();

        let impersonate = credentials.impersonation().unwrap();
        assert_eq!(impersonate.user, "alice");
        assert_eq!(impersonate.groups, vec!["devs", "ops"]);
        assert_eq!(
            impersonate.extra.get("scopes"),
            Some(&vec!["view".to_string(), "edit".to_string()])
        );
        assert_eq!(credentials.bearer_token(), Some("admin"));
    }

    #[test]
    fn test_impersonation_requires_user() {
        let err = credentials_from_headers(&headers(&[("impersonate-group", "devs")])).unwrap_err();
        assert_eq!(err.details, Some(serde_json::json!({"header": "Impersonate-Group"})));

        let err =
            credentials_from_headers(&headers(&[("impersonate-extra-scopes", "view")])).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);

        let err = credentials_from_headers(&headers(&[("impersonate-user", " ")])).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
    }

    #[test]
    fn test_blank_impersonated_group_rejected() {
        let err = credentials_from_headers(&headers(&[
            ("impersonate-user", "alice"),
            ("impersonate-group", "devs"),
            ("impersonate-group", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
        assert_eq!(err.details, Some(serde_json::json!({"header": "Impersonate-Group"})));
    }

    #[test]
    fn test_non_ascii_header_rejected() {
        let mut map = HeaderMap::new();
        map.insert(
            AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        );
        assert!(credentials_from_headers(&map).is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use axum::http::HeaderName;
    use proptest::prelude::*;
    use xgql_test_utils::generators::{arb_impersonation, arb_token};

    proptest! {
        #[test]
        fn prop_bearer_token_round_trips(token in arb_token()) {
            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            );
            let credentials = credentials_from_headers(&headers).unwrap();
            prop_assert_eq!(credentials.bearer_token(), Some(token.as_str()));
        }

        #[test]
        fn prop_impersonation_headers_round_trip(imp in arb_impersonation()) {
            let mut headers = HeaderMap::new();
            headers.insert(
                HeaderName::from_static(IMPERSONATE_USER),
                HeaderValue::from_str(&imp.user).unwrap(),
            );
            for group in &imp.groups {
                headers.append(
                    HeaderName::from_static(IMPERSONATE_GROUP),
                    HeaderValue::from_str(group).unwrap(),
                );
            }
            let credentials = credentials_from_headers(&headers).unwrap();
            prop_assert_eq!(credentials.impersonation(), Some(&imp));
            prop_assert!(credentials.bearer_token().is_none());
        }
    }
}
