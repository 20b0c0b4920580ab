//! Query root.

use async_graphql::{Context, ErrorExtensions, Object, ID};
use xgql_core::GroupVersionKind;

use super::context::{report_error, resolved, Scoped};
use super::model::{
    crd_gvk, is_active_revision, provider_gvk, provider_revision_gvk, Connection,
    CustomResourceDefinition, KubernetesResource, Provider, ProviderRevision, ReferenceId,
};

#[derive(Debug, Default)]
pub struct Query;

#[Object]
impl Query {
    /// Installed providers.
    async fn providers(&self, ctx: &Context<'_>) -> Option<Connection<Provider>> {
        let listed = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.list(&provider_gvk(), None).await
        }
        .await;
        resolved(ctx, listed).map(|providers| {
            providers
                .iter()
                .map(|provider| Provider::from(provider.as_ref()))
                .collect()
        })
    }

    /// Provider revisions. `active: true` keeps only active revisions.
    async fn provider_revisions(
        &self,
        ctx: &Context<'_>,
        active: Option<bool>,
    ) -> Option<Connection<ProviderRevision>> {
        let listed = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.list(&provider_revision_gvk(), None).await
        }
        .await;
        let only_active = active == Some(true);
        resolved(ctx, listed).map(|revisions| {
            revisions
                .iter()
                .filter(|revision| !only_active || is_active_revision(revision))
                .map(|revision| ProviderRevision::from(revision.as_ref()))
                .collect()
        })
    }

    async fn custom_resource_definitions(
        &self,
        ctx: &Context<'_>,
    ) -> Option<Connection<CustomResourceDefinition>> {
        let listed = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.list(&crd_gvk(), None).await
        }
        .await;
        resolved(ctx, listed).map(|crds| {
            crds.iter()
                .map(|crd| CustomResourceDefinition::from(crd.as_ref()))
                .collect()
        })
    }

    /// Any object by its `id`. A missing object is an error.
    async fn kubernetes_resource(
        &self,
        ctx: &Context<'_>,
        id: ID,
    ) -> Option<KubernetesResource> {
        let reference = match ReferenceId::decode(&id) {
            Ok(reference) => reference,
            Err(err) => {
                let error = async_graphql::Error::new(err.to_string())
                    .extend_with(|_, ext| ext.set("code", "INVALID_ID"));
                report_error(ctx, error);
                return None;
            }
        };
        let fetched = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.get_reference(&reference.reference()).await
        }
        .await;
        resolved(ctx, fetched).map(|obj| KubernetesResource::decode(&obj))
    }

    /// Objects of any served kind, optionally in one namespace.
    async fn kubernetes_resources(
        &self,
        ctx: &Context<'_>,
        api_version: String,
        kind: String,
        namespace: Option<String>,
    ) -> Option<Connection<KubernetesResource>> {
        let gvk = GroupVersionKind::from_api_version(&api_version, &kind);
        let listed = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.list(&gvk, namespace.as_deref()).await
        }
        .await;
        resolved(ctx, listed).map(|objects| {
            objects
                .iter()
                .map(|obj| KubernetesResource::decode(obj))
                .collect()
        })
    }
}
