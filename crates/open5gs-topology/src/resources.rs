//! Managed resource kinds
//!
//! A closed sum type over everything the engine creates. Dispatch happens on
//! [`ResourceKind`], never on runtime type inspection.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

/// API group of the optional metrics monitor kind
pub const MONITOR_GROUP: &str = "monitoring.coreos.com";
/// API version of the metrics monitor kind
pub const MONITOR_VERSION: &str = "v1";
/// Kind name of the metrics monitor
pub const MONITOR_KIND: &str = "ServiceMonitor";

/// `ApiResource` for `monitoring.coreos.com/v1 ServiceMonitor`
pub fn monitor_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(MONITOR_GROUP, MONITOR_VERSION, MONITOR_KIND),
        "servicemonitors",
    )
}

/// Kind tag of a managed resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// ConfigMap holding a component's configuration files
    ConfigBundle,
    /// Deployment running the component
    Workload,
    /// Service publishing one endpoint
    NetworkEndpoint,
    /// PersistentVolumeClaim for stateful components
    PersistentStore,
    /// ServiceAccount
    Identity,
    /// Prometheus ServiceMonitor
    MetricsMonitor,
}

impl ResourceKind {
    /// Convergence order within a component
    pub const ORDER: [ResourceKind; 6] = [
        ResourceKind::ConfigBundle,
        ResourceKind::Workload,
        ResourceKind::NetworkEndpoint,
        ResourceKind::PersistentStore,
        ResourceKind::Identity,
        ResourceKind::MetricsMonitor,
    ];

    /// Kubernetes kind name
    pub fn api_kind(&self) -> &'static str {
        match self {
            ResourceKind::ConfigBundle => "ConfigMap",
            ResourceKind::Workload => "Deployment",
            ResourceKind::NetworkEndpoint => "Service",
            ResourceKind::PersistentStore => "PersistentVolumeClaim",
            ResourceKind::Identity => "ServiceAccount",
            ResourceKind::MetricsMonitor => MONITOR_KIND,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_kind())
    }
}

/// One desired or observed resource
#[derive(Clone, Debug)]
pub enum ManagedResource {
    /// ConfigMap
    ConfigBundle(ConfigMap),
    /// Deployment
    Workload(Deployment),
    /// Service
    NetworkEndpoint(Service),
    /// PersistentVolumeClaim
    PersistentStore(PersistentVolumeClaim),
    /// ServiceAccount
    Identity(ServiceAccount),
    /// ServiceMonitor, handled dynamically because its CRD is optional
    MetricsMonitor(DynamicObject),
}

impl ManagedResource {
    /// Kind tag
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::ConfigBundle(_) => ResourceKind::ConfigBundle,
            ManagedResource::Workload(_) => ResourceKind::Workload,
            ManagedResource::NetworkEndpoint(_) => ResourceKind::NetworkEndpoint,
            ManagedResource::PersistentStore(_) => ResourceKind::PersistentStore,
            ManagedResource::Identity(_) => ResourceKind::Identity,
            ManagedResource::MetricsMonitor(_) => ResourceKind::MetricsMonitor,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedResource::ConfigBundle(r) => &r.metadata,
            ManagedResource::Workload(r) => &r.metadata,
            ManagedResource::NetworkEndpoint(r) => &r.metadata,
            ManagedResource::PersistentStore(r) => &r.metadata,
            ManagedResource::Identity(r) => &r.metadata,
            ManagedResource::MetricsMonitor(r) => &r.metadata,
        }
    }

    /// Mutable object metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedResource::ConfigBundle(r) => &mut r.metadata,
            ManagedResource::Workload(r) => &mut r.metadata,
            ManagedResource::NetworkEndpoint(r) => &mut r.metadata,
            ManagedResource::PersistentStore(r) => &mut r.metadata,
            ManagedResource::Identity(r) => &mut r.metadata,
            ManagedResource::MetricsMonitor(r) => &mut r.metadata,
        }
    }

    /// Object name, empty if unset
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, empty if unset
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }
}

/// Everything one component should have, compiled from the normalized spec
#[derive(Clone, Debug, Default)]
pub struct DesiredBundle {
    /// Configuration files
    pub config: Option<ConfigMap>,
    /// The component's Deployment
    pub workload: Option<Deployment>,
    /// One Service per endpoint
    pub endpoints: Vec<Service>,
    /// Persistent claim
    pub store: Option<PersistentVolumeClaim>,
    /// ServiceAccount
    pub identity: Option<ServiceAccount>,
    /// ServiceMonitor
    pub monitor: Option<DynamicObject>,
}
