//! Resolver plumbing: the caller's client, the request budget and field
//! errors.

use std::sync::Arc;
use std::time::Duration;

use async_graphql::{Context, ErrorExtensions};
use tracing::debug;
use xgql_clients::{ClientCache, SelectiveCachingClient};
use xgql_core::{ClientError, Credentials, DynamicObject, GroupVersionKind, ObjectReference};

use crate::deadline::RequestDeadline;

/// Schema-wide data.
#[derive(Clone)]
pub struct Gateway {
    pub cache: Arc<ClientCache>,
    pub call_timeout: Duration,
    pub request_timeout: Duration,
}

/// The caller's client with every call bounded by the request budget.
pub(crate) struct Scoped {
    client: Arc<SelectiveCachingClient>,
    deadline: RequestDeadline,
    call_timeout: Duration,
}

impl Scoped {
    /// Acquire the client for the credentials attached to this request.
    /// Requests without credentials are anonymous.
    pub(crate) async fn acquire(ctx: &Context<'_>) -> Result<Self, ClientError> {
        let gateway = ctx
            .data::<Gateway>()
            .map_err(|e| ClientError::ClientConstructionFailed { reason: e.message })?;
        let credentials = ctx.data_opt::<Credentials>().cloned().unwrap_or_default();
        let deadline = ctx
            .data_opt::<RequestDeadline>()
            .copied()
            .unwrap_or_else(|| RequestDeadline::after(gateway.request_timeout));

        let client = deadline
            .bound(gateway.call_timeout, gateway.cache.get_or_create(&credentials))
            .await?;
        Ok(Self {
            client,
            deadline,
            call_timeout: gateway.call_timeout,
        })
    }

    pub(crate) async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        self.deadline
            .bound(self.call_timeout, self.client.get(gvk, namespace, name))
            .await
    }

    pub(crate) async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        self.deadline
            .bound(self.call_timeout, self.client.list(gvk, namespace))
            .await
    }

    pub(crate) async fn get_reference(
        &self,
        reference: &ObjectReference,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        self.deadline
            .bound(self.call_timeout, self.client.get_reference(reference))
            .await
    }
}

/// GraphQL error for a failed downstream call, coded by failure class.
pub fn field_error(err: &ClientError) -> async_graphql::Error {
    let code = err.code();
    async_graphql::Error::new(err.to_string()).extend_with(|_, ext| ext.set("code", code))
}

/// Record an error at the current field's path without failing the field.
pub(crate) fn report(ctx: &Context<'_>, err: &ClientError) {
    debug!(code = err.code(), error = %err, "Field resolved with error");
    report_error(ctx, field_error(err));
}

pub(crate) fn report_error(ctx: &Context<'_>, error: async_graphql::Error) {
    let error = error.into_server_error(ctx.item.pos);
    ctx.add_error(ctx.set_error_path(error));
}

/// Absent on failure, with the failure recorded as a field error.
pub(crate) fn resolved<T>(ctx: &Context<'_>, result: Result<T, ClientError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            report(ctx, &err);
            None
        }
    }
}
