//! Control-plane access for managed resources
//!
//! The engine never touches `kube::Api` directly. It talks to a
//! [`ControlPlane`], which dispatches on [`ResourceKind`] to the typed API of
//! each kind, so tests can drive the engine with a mock or an in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, Preconditions,
};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use open5gs_common::crd::{Open5GS, Open5GSStatus};
use open5gs_common::{Error, OPERATOR_NAME};

use crate::resources::{monitor_api_resource, ManagedResource, ResourceKind};

/// Generic per-kind operations against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read one resource. Not-found is `Ok(None)`.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, Error>;

    /// List resources of `kind` matching a label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, Error>;

    /// Create a resource
    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, Error>;

    /// Replace a resource. Fails with a conflict when the carried
    /// `resourceVersion` is stale.
    async fn replace(&self, resource: &ManagedResource) -> Result<ManagedResource, Error>;

    /// Delete exactly the observed `resource`: the call is preconditioned on
    /// its uid, so an object recreated under the same name in the meantime
    /// surfaces as a conflict instead. Deleting an absent resource succeeds.
    async fn delete(&self, resource: &ManagedResource) -> Result<(), Error>;

    /// Merge-patch the status subresource of an Open5GS object
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &Open5GSStatus,
    ) -> Result<(), Error>;
}

/// [`ControlPlane`] backed by a kube client
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn typed<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn monitors(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &monitor_api_resource())
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

async fn list_typed<K>(api: Api<K>, selector: &str) -> Result<Vec<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.list(&ListParams::default().labels(selector)).await?.items)
}

async fn delete_typed<K>(api: Api<K>, name: &str, uid: Option<String>) -> Result<(), Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = DeleteParams {
        preconditions: uid.map(|uid| Preconditions {
            uid: Some(uid),
            resource_version: None,
        }),
        ..DeleteParams::background()
    };
    match api.delete(name, &params).await.map_err(Error::from) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(name, "already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn replace_typed<K>(api: Api<K>, resource: &K) -> Result<K, Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::internal_with_context("replace", "resource has no name"))?;
    Ok(api.replace(&name, &post_params(), resource).await?)
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, Error> {
        let found = match kind {
            ResourceKind::ConfigBundle => self
                .typed::<ConfigMap>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::ConfigBundle),
            ResourceKind::Workload => self
                .typed::<Deployment>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::Workload),
            ResourceKind::NetworkEndpoint => self
                .typed::<Service>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::NetworkEndpoint),
            ResourceKind::PersistentStore => self
                .typed::<PersistentVolumeClaim>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::PersistentStore),
            ResourceKind::Identity => self
                .typed::<ServiceAccount>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::Identity),
            ResourceKind::MetricsMonitor => self
                .monitors(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::MetricsMonitor),
        };
        Ok(found)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, Error> {
        let listed = match kind {
            ResourceKind::ConfigBundle => list_typed(self.typed::<ConfigMap>(namespace), selector)
                .await?
                .into_iter()
                .map(ManagedResource::ConfigBundle)
                .collect(),
            ResourceKind::Workload => list_typed(self.typed::<Deployment>(namespace), selector)
                .await?
                .into_iter()
                .map(ManagedResource::Workload)
                .collect(),
            ResourceKind::NetworkEndpoint => list_typed(self.typed::<Service>(namespace), selector)
                .await?
                .into_iter()
                .map(ManagedResource::NetworkEndpoint)
                .collect(),
            ResourceKind::PersistentStore => {
                list_typed(self.typed::<PersistentVolumeClaim>(namespace), selector)
                    .await?
                    .into_iter()
                    .map(ManagedResource::PersistentStore)
                    .collect()
            }
            ResourceKind::Identity => list_typed(self.typed::<ServiceAccount>(namespace), selector)
                .await?
                .into_iter()
                .map(ManagedResource::Identity)
                .collect(),
            ResourceKind::MetricsMonitor => list_typed(self.monitors(namespace), selector)
                .await?
                .into_iter()
                .map(ManagedResource::MetricsMonitor)
                .collect(),
        };
        Ok(listed)
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, Error> {
        let ns = resource.namespace();
        let pp = post_params();
        let created = match resource {
            ManagedResource::ConfigBundle(r) => {
                ManagedResource::ConfigBundle(self.typed(ns).create(&pp, r).await?)
            }
            ManagedResource::Workload(r) => {
                ManagedResource::Workload(self.typed(ns).create(&pp, r).await?)
            }
            ManagedResource::NetworkEndpoint(r) => {
                ManagedResource::NetworkEndpoint(self.typed(ns).create(&pp, r).await?)
            }
            ManagedResource::PersistentStore(r) => {
                ManagedResource::PersistentStore(self.typed(ns).create(&pp, r).await?)
            }
            ManagedResource::Identity(r) => {
                ManagedResource::Identity(self.typed(ns).create(&pp, r).await?)
            }
            ManagedResource::MetricsMonitor(r) => {
                ManagedResource::MetricsMonitor(self.monitors(ns).create(&pp, r).await?)
            }
        };
        Ok(created)
    }

    async fn replace(&self, resource: &ManagedResource) -> Result<ManagedResource, Error> {
        let ns = resource.namespace();
        let replaced = match resource {
            ManagedResource::ConfigBundle(r) => {
                ManagedResource::ConfigBundle(replace_typed(self.typed(ns), r).await?)
            }
            ManagedResource::Workload(r) => {
                ManagedResource::Workload(replace_typed(self.typed(ns), r).await?)
            }
            ManagedResource::NetworkEndpoint(r) => {
                ManagedResource::NetworkEndpoint(replace_typed(self.typed(ns), r).await?)
            }
            ManagedResource::PersistentStore(r) => {
                ManagedResource::PersistentStore(replace_typed(self.typed(ns), r).await?)
            }
            ManagedResource::Identity(r) => {
                ManagedResource::Identity(replace_typed(self.typed(ns), r).await?)
            }
            ManagedResource::MetricsMonitor(r) => {
                ManagedResource::MetricsMonitor(replace_typed(self.monitors(ns), r).await?)
            }
        };
        Ok(replaced)
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<(), Error> {
        let ns = resource.namespace();
        let name = resource.name();
        let uid = resource.meta().uid.clone();
        match resource.kind() {
            ResourceKind::ConfigBundle => {
                delete_typed(self.typed::<ConfigMap>(ns), name, uid).await
            }
            ResourceKind::Workload => delete_typed(self.typed::<Deployment>(ns), name, uid).await,
            ResourceKind::NetworkEndpoint => {
                delete_typed(self.typed::<Service>(ns), name, uid).await
            }
            ResourceKind::PersistentStore => {
                delete_typed(self.typed::<PersistentVolumeClaim>(ns), name, uid).await
            }
            ResourceKind::Identity => {
                delete_typed(self.typed::<ServiceAccount>(ns), name, uid).await
            }
            ResourceKind::MetricsMonitor => delete_typed(self.monitors(ns), name, uid).await,
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &Open5GSStatus,
    ) -> Result<(), Error> {
        let api: Api<Open5GS> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
