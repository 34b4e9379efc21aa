//! Datastore address resolution
//!
//! The datastore of an Open5GS object is reached through its `{name}-mongodb`
//! Service. A missing Service or one without a routable ClusterIP means the
//! datastore is not reachable yet, which callers treat as "skip this pass".

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use open5gs_common::crd::Open5GSRef;
use open5gs_common::{datastore_service_name, Error, DEFAULT_DATASTORE_PORT};

/// Finds the datastore URI of an Open5GS object
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatastoreResolver: Send + Sync {
    /// Resolve the datastore of `reference`, looking in `fallback_namespace`
    /// when the reference names none. `Ok(None)` means unresolved.
    async fn resolve(
        &self,
        reference: &Open5GSRef,
        fallback_namespace: &str,
    ) -> Result<Option<String>, Error>;
}

/// [`DatastoreResolver`] reading Services through the API server
pub struct KubeDatastoreResolver {
    client: Client,
    port: u16,
}

impl KubeDatastoreResolver {
    /// Resolve against the default datastore port
    pub fn new(client: Client) -> Self {
        Self {
            client,
            port: DEFAULT_DATASTORE_PORT,
        }
    }

    /// Override the datastore port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Namespace the referenced Open5GS object lives in
pub fn target_namespace<'a>(reference: &'a Open5GSRef, fallback: &'a str) -> &'a str {
    if reference.namespace.is_empty() {
        fallback
    } else {
        &reference.namespace
    }
}

/// Connection URI for a datastore Service, if it has a routable address
pub fn datastore_uri(service: &Service, port: u16) -> Option<String> {
    let ip = service.spec.as_ref()?.cluster_ip.as_deref()?;
    if ip.is_empty() || ip == "None" {
        return None;
    }
    Some(format!("mongodb://{ip}:{port}"))
}

#[async_trait]
impl DatastoreResolver for KubeDatastoreResolver {
    async fn resolve(
        &self,
        reference: &Open5GSRef,
        fallback_namespace: &str,
    ) -> Result<Option<String>, Error> {
        let namespace = target_namespace(reference, fallback_namespace);
        let name = datastore_service_name(&reference.name);
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);

        let Some(service) = api.get_opt(&name).await? else {
            debug!(service = %name, namespace, "datastore service not found");
            return Ok(None);
        };
        let uri = datastore_uri(&service, self.port);
        if uri.is_none() {
            debug!(service = %name, namespace, "datastore service has no cluster IP");
        }
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(cluster_ip: Option<&str>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn cluster_ip_and_port_form_the_uri() {
        assert_eq!(
            datastore_uri(&service(Some("10.96.4.12")), 27017).as_deref(),
            Some("mongodb://10.96.4.12:27017")
        );
        assert_eq!(
            datastore_uri(&service(Some("10.96.4.12")), 27018).as_deref(),
            Some("mongodb://10.96.4.12:27018")
        );
    }

    #[test]
    fn headless_or_unallocated_service_is_unresolved() {
        assert_eq!(datastore_uri(&service(Some("None")), 27017), None);
        assert_eq!(datastore_uri(&service(Some("")), 27017), None);
        assert_eq!(datastore_uri(&service(None), 27017), None);
        assert_eq!(datastore_uri(&Service::default(), 27017), None);
    }

    #[test]
    fn empty_reference_namespace_falls_back() {
        let mut reference = Open5GSRef {
            name: "Core".to_string(),
            namespace: "5g".to_string(),
        };
        assert_eq!(target_namespace(&reference, "users"), "5g");
        reference.namespace.clear();
        assert_eq!(target_namespace(&reference, "users"), "users");
        assert_eq!(datastore_service_name(&reference.name), "core-mongodb");
    }

    /// Story: a user that names only the core finds it in its own namespace
    #[test]
    fn story_omitted_reference_namespace_means_the_users_own() {
        let spec: open5gs_common::crd::Open5GSUserSpec =
            serde_json::from_str(r#"{"open5gs":{"name":"core"}}"#).expect("parses");
        assert_eq!(target_namespace(&spec.open5gs, "subscribers"), "subscribers");

        let defaulted = open5gs_common::crd::Open5GSUserSpec::default();
        assert_eq!(target_namespace(&defaulted.open5gs, "subscribers"), "subscribers");
    }
}
