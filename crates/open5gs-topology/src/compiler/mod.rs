//! Desired-state compiler
//!
//! Turns the normalized spec of one component into the [`DesiredBundle`] the
//! engine converges. The output is plain data with no ownership markers or
//! fingerprints; those are stamped by the reconcile loop.
//!
//! - [`config`]: configuration files of the component's bundle
//! - [`workload`]: the Deployment and its per-component pod profile
//! - this module: endpoints, identity, persistent claim and metrics monitor

pub mod config;
mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, PersistentVolumeClaimSpec, Service, ServiceAccount,
    ServicePort, ServiceSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use open5gs_common::{Error, LABEL_COMPONENT, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME, OPERATOR_NAME};

use crate::component::{endpoint_service_name, resource_name, ComponentKind};
use crate::normalize::NormalizedSpec;
use crate::resources::{monitor_api_resource, DesiredBundle};

pub use config::config_files;
pub(crate) use workload::active_endpoints;

/// Label value marking metrics endpoints
pub const METRICS_COMPONENT: &str = "metrics";

/// Label the Prometheus operator selects monitors by
const MONITOR_RELEASE_LABEL: (&str, &str) = ("release", "prometheus");

/// Compiles one component of an Open5GS object into desired resources
#[cfg_attr(test, automock)]
pub trait DesiredStateCompiler: Send + Sync {
    /// Desired resources of `component` for the object `parent` in `namespace`
    fn compile(
        &self,
        parent: &str,
        namespace: &str,
        spec: &NormalizedSpec,
        component: ComponentKind,
    ) -> Result<DesiredBundle, Error>;
}

/// The catalogue-driven compiler used in production
#[derive(Clone, Copy, Debug, Default)]
pub struct Open5GSCompiler;

impl DesiredStateCompiler for Open5GSCompiler {
    fn compile(
        &self,
        parent: &str,
        namespace: &str,
        spec: &NormalizedSpec,
        component: ComponentKind,
    ) -> Result<DesiredBundle, Error> {
        let target = Target {
            parent,
            namespace,
            component,
        };
        let settings = spec.settings(component);
        let descriptor = component.descriptor();
        let monitored =
            settings.service_monitor && settings.metrics && descriptor.metrics_capable;

        Ok(DesiredBundle {
            config: Some(build_config(&target, spec)?),
            workload: Some(workload::build_workload(&target, spec)),
            endpoints: build_endpoints(&target, spec),
            store: descriptor.storage.map(|size| build_store(&target, size)),
            identity: settings
                .service_account
                .then(|| build_identity(&target)),
            monitor: monitored.then(|| build_monitor(&target)),
        })
    }
}

/// Naming and labelling context for one component of one parent
pub(crate) struct Target<'a> {
    pub(crate) parent: &'a str,
    pub(crate) namespace: &'a str,
    pub(crate) component: ComponentKind,
}

impl Target<'_> {
    /// Labels pods are selected by
    pub(crate) fn selector_labels(&self) -> BTreeMap<String, String> {
        selector_labels(self.parent, self.component)
    }

    /// Metadata with the common labels plus `extra`
    pub(crate) fn metadata(&self, name: &str, extra: BTreeMap<String, String>) -> ObjectMeta {
        let mut labels = self.selector_labels();
        labels.insert(LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
        labels.extend(extra);
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        }
    }
}

/// `{instance: parent, name: component}`, also used to list a component's endpoints
pub fn selector_labels(parent: &str, component: ComponentKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_INSTANCE.to_string(), parent.to_string()),
        (LABEL_NAME.to_string(), component.name().to_string()),
    ])
}

/// Label selector string matching every endpoint of a component
pub fn endpoint_selector(parent: &str, component: ComponentKind) -> String {
    selector_labels(parent, component)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_config(target: &Target<'_>, spec: &NormalizedSpec) -> Result<ConfigMap, Error> {
    let name = resource_name(target.parent, target.component);
    Ok(ConfigMap {
        metadata: target.metadata(&name, BTreeMap::new()),
        data: Some(config_files(target.component, target.parent, spec)?),
        ..Default::default()
    })
}

fn build_endpoints(target: &Target<'_>, spec: &NormalizedSpec) -> Vec<Service> {
    let settings = spec.settings(target.component);
    active_endpoints(target.component.descriptor(), settings.metrics)
        .into_iter()
        .map(|endpoint| {
            let extra = if endpoint.name == METRICS_COMPONENT {
                BTreeMap::from([(LABEL_COMPONENT.to_string(), METRICS_COMPONENT.to_string())])
            } else {
                BTreeMap::new()
            };
            let name = endpoint_service_name(target.parent, target.component, endpoint.name);
            Service {
                metadata: target.metadata(&name, extra),
                spec: Some(ServiceSpec {
                    type_: Some(settings.exposure_of(endpoint.name).as_str().to_string()),
                    selector: Some(target.selector_labels()),
                    ports: Some(vec![ServicePort {
                        name: Some(endpoint.name.to_string()),
                        port: endpoint.port,
                        target_port: Some(IntOrString::String(endpoint.name.to_string())),
                        protocol: Some(endpoint.protocol.as_str().to_string()),
                        ..Default::default()
                    }]),
                    publish_not_ready_addresses: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect()
}

fn build_store(target: &Target<'_>, size: &str) -> PersistentVolumeClaim {
    let name = resource_name(target.parent, target.component);
    PersistentVolumeClaim {
        metadata: target.metadata(&name, BTreeMap::new()),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_identity(target: &Target<'_>) -> ServiceAccount {
    let name = resource_name(target.parent, target.component);
    ServiceAccount {
        metadata: target.metadata(&name, BTreeMap::new()),
        automount_service_account_token: Some(true),
        ..Default::default()
    }
}

fn build_monitor(target: &Target<'_>) -> DynamicObject {
    let name = resource_name(target.parent, target.component);
    let mut metrics_labels = target.selector_labels();
    metrics_labels.insert(LABEL_COMPONENT.to_string(), METRICS_COMPONENT.to_string());

    let mut monitor = DynamicObject::new(&name, &monitor_api_resource())
        .within(target.namespace)
        .data(json!({
            "spec": {
                "selector": { "matchLabels": metrics_labels },
                "namespaceSelector": { "matchNames": [target.namespace] },
                "endpoints": [ {
                    "port": METRICS_COMPONENT,
                    "path": "/metrics",
                    "interval": "30s",
                } ],
            }
        }));
    monitor.metadata.labels = target
        .metadata(
            &name,
            BTreeMap::from([(
                MONITOR_RELEASE_LABEL.0.to_string(),
                MONITOR_RELEASE_LABEL.1.to_string(),
            )]),
        )
        .labels;
    monitor
}

// =============================================================================
// Tests
// =============================================================================
