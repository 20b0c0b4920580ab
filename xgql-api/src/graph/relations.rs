//! Relation resolvers.
//!
//! Each relation runs its downstream calls in a fixed order and keeps the
//! order the store returned. A failed relation is null with an error at its
//! path; the object holding it is unaffected.

use async_graphql::{ComplexObject, Context};
use xgql_core::{is_controller, ObjectExt, ObjectReference};

use super::context::{report, resolved, Scoped};
use super::model::{
    event_gvk, involved_uid, is_active_revision, is_crd_reference, provider_revision_gvk,
    Connection, CustomResourceDefinition, Event, GenericResource, KubernetesResource, Owner,
    Provider, ProviderRevision, ProviderRevisionStatus,
};

/// Events whose `involvedObject.uid` is `uid`. Objects without a uid have
/// no events.
async fn events_for(ctx: &Context<'_>, uid: Option<&str>) -> Option<Connection<Event>> {
    let Some(uid) = uid else {
        return Some(Connection::from_nodes(Vec::new()));
    };
    let listed = async {
        let scope = Scoped::acquire(ctx).await?;
        scope.list(&event_gvk(), None).await
    }
    .await;

    resolved(ctx, listed).map(|events| {
        events
            .iter()
            .filter(|event| involved_uid(event) == Some(uid))
            .map(|event| Event::from(event.as_ref()))
            .collect()
    })
}

#[ComplexObject]
impl Provider {
    /// Revisions controlled by this provider. `active: true` keeps only the
    /// revision whose desired state is Active.
    async fn revisions(
        &self,
        ctx: &Context<'_>,
        active: Option<bool>,
    ) -> Option<Connection<ProviderRevision>> {
        let Some(uid) = self.metadata.uid.as_deref() else {
            return Some(Connection::from_nodes(Vec::new()));
        };
        let listed = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.list(&provider_revision_gvk(), None).await
        }
        .await;

        let only_active = active == Some(true);
        resolved(ctx, listed).map(|revisions| {
            revisions
                .iter()
                .filter(|revision| revision.is_controlled_by(uid))
                .filter(|revision| !only_active || is_active_revision(revision))
                .map(|revision| ProviderRevision::from(revision.as_ref()))
                .collect()
        })
    }

    async fn events(&self, ctx: &Context<'_>) -> Option<Connection<Event>> {
        events_for(ctx, self.metadata.uid.as_deref()).await
    }
}

#[ComplexObject]
impl ProviderRevision {
    async fn events(&self, ctx: &Context<'_>) -> Option<Connection<Event>> {
        events_for(ctx, self.metadata.uid.as_deref()).await
    }
}

#[ComplexObject]
impl ProviderRevisionStatus {
    /// Objects installed by the revision. Only CustomResourceDefinition
    /// references are followed; a reference that cannot be fetched is
    /// reported and left out.
    async fn objects(&self, ctx: &Context<'_>) -> Option<Connection<KubernetesResource>> {
        let scope = resolved(ctx, Scoped::acquire(ctx).await)?;

        let mut nodes = Vec::new();
        for reference in self.object_refs.iter().filter(|r| is_crd_reference(r)) {
            match scope.get_reference(reference).await {
                Ok(obj) => nodes.push(KubernetesResource::decode(&obj)),
                Err(err) => report(ctx, &err),
            }
        }
        Some(Connection::from_nodes(nodes))
    }
}

#[ComplexObject]
impl CustomResourceDefinition {
    async fn events(&self, ctx: &Context<'_>) -> Option<Connection<Event>> {
        events_for(ctx, self.metadata.uid.as_deref()).await
    }
}

#[ComplexObject]
impl Event {
    /// The object this event is about.
    async fn involved_object(&self, ctx: &Context<'_>) -> Option<KubernetesResource> {
        let fetched = async {
            let scope = Scoped::acquire(ctx).await?;
            scope.get_reference(&self.involved_object_ref).await
        }
        .await;
        resolved(ctx, fetched).map(|obj| KubernetesResource::decode(&obj))
    }
}

#[ComplexObject]
impl GenericResource {
    /// Owners of this resource. `controller: true` keeps only the
    /// controlling owner. Owners that no longer exist are left out silently.
    async fn owners(
        &self,
        ctx: &Context<'_>,
        controller: Option<bool>,
    ) -> Option<Connection<Owner>> {
        let scope = resolved(ctx, Scoped::acquire(ctx).await)?;
        let only_controller = controller == Some(true);

        let mut nodes = Vec::new();
        for owner in &self.owner_refs {
            if only_controller && !is_controller(owner) {
                continue;
            }
            let reference =
                ObjectReference::from_owner(owner, self.metadata.namespace.as_deref());
            match scope.get_reference(&reference).await {
                Ok(obj) => nodes.push(Owner {
                    controller: is_controller(owner),
                    resource: KubernetesResource::decode(&obj),
                }),
                Err(err) if err.is_not_found() => {}
                Err(err) => report(ctx, &err),
            }
        }
        Some(Connection::from_nodes(nodes))
    }

    async fn events(&self, ctx: &Context<'_>) -> Option<Connection<Event>> {
        events_for(ctx, self.metadata.uid.as_deref()).await
    }
}
