//! Convergence engine
//!
//! Diffs desired against observed state one resource at a time and issues the
//! smallest create/replace/delete call that closes the gap. Every mutation of
//! an existing resource is gated on [`owns`]: a resource that merely shares a
//! name with something we would create is never adopted or clobbered.
//!
//! Equality is restricted to the fields this engine sets. Labels and
//! annotations are compared as subsets, so keys added by other actors neither
//! count as drift nor get stripped on update.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PersistentVolumeClaim, PodSpec, Service, ServiceAccount, ServicePort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use tracing::{debug, info, warn};

use open5gs_common::Error;

use crate::client::ControlPlane;
use crate::compiler::{active_endpoints, endpoint_selector};
use crate::component::{endpoint_service_name, resource_name, ComponentKind};
use crate::ownership::{mark, owns, Owner};
use crate::resources::{DesiredBundle, ManagedResource, ResourceKind};

/// What a single converge step did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The resource did not exist and was created
    Created,
    /// An owned resource drifted and was replaced
    Updated,
    /// Nothing to do
    Unchanged,
    /// An owned resource was deleted
    Deleted,
    /// The resource exists but belongs to someone else
    SkippedForeign,
}

/// Outcome counts of one component's pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    /// Resources created
    pub created: usize,
    /// Resources replaced
    pub updated: usize,
    /// Resources already in sync (or already absent)
    pub unchanged: usize,
    /// Resources deleted
    pub deleted: usize,
    /// Foreign resources left alone
    pub skipped_foreign: usize,
}

impl ConvergeReport {
    /// Count one outcome
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::SkippedForeign => self.skipped_foreign += 1,
        }
    }

    /// Add another report's counts
    pub fn merge(&mut self, other: ConvergeReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.skipped_foreign += other.skipped_foreign;
    }

    /// Number of mutating calls issued
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Whether the optional metrics monitor kind may be touched this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorSupport {
    /// The cluster serves the kind
    Supported,
    /// The kind does not exist; nothing to create or clean up
    Unsupported,
    /// The probe failed; leave monitors alone this pass
    Unknown,
}

impl MonitorSupport {
    fn supported(self) -> bool {
        self == MonitorSupport::Supported
    }
}

/// Converges the resources of one owner
pub struct ConvergenceEngine<'a> {
    plane: &'a dyn ControlPlane,
    owner: &'a Owner,
}

impl<'a> ConvergenceEngine<'a> {
    /// Engine acting on behalf of `owner`
    pub fn new(plane: &'a dyn ControlPlane, owner: &'a Owner) -> Self {
        Self { plane, owner }
    }

    /// Create, update or leave one resource.
    ///
    /// A not-found read takes the create path. An observed resource without
    /// this owner's marker is left untouched.
    pub async fn converge_one(&self, mut desired: ManagedResource) -> Result<Outcome, Error> {
        let kind = desired.kind();
        let namespace = desired.namespace().to_string();
        let name = desired.name().to_string();

        let Some(observed) = self.plane.get(kind, &namespace, &name).await? else {
            mark(desired.meta_mut(), self.owner);
            self.plane.create(&desired).await?;
            info!(kind = %kind, resource = %name, "created");
            return Ok(Outcome::Created);
        };

        if !owns(observed.meta(), self.owner) {
            warn!(
                kind = %kind,
                resource = %name,
                owner = %self.owner.name,
                "resource exists without our ownership marker, leaving it alone"
            );
            return Ok(Outcome::SkippedForeign);
        }

        if in_sync(&desired, &observed) {
            debug!(kind = %kind, resource = %name, "in sync");
            return Ok(Outcome::Unchanged);
        }

        let merged = merge_owned(desired, observed)?;
        self.plane.replace(&merged).await?;
        info!(kind = %kind, resource = %name, "updated");
        Ok(Outcome::Updated)
    }

    /// Delete one resource by name if it exists and is ours
    pub async fn remove(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome, Error> {
        let Some(observed) = self.plane.get(kind, namespace, name).await? else {
            return Ok(Outcome::Unchanged);
        };
        if !owns(observed.meta(), self.owner) {
            warn!(kind = %kind, resource = %name, "not deleting resource we do not own");
            return Ok(Outcome::SkippedForeign);
        }
        self.plane.delete(&observed).await?;
        info!(kind = %kind, resource = %name, "deleted");
        Ok(Outcome::Deleted)
    }

    /// Converge a component's endpoints, then delete owned endpoints that
    /// match its selector but are no longer desired
    pub async fn converge_endpoints(
        &self,
        namespace: &str,
        selector: &str,
        desired: Vec<Service>,
    ) -> Result<ConvergeReport, Error> {
        let mut report = ConvergeReport::default();
        let wanted: BTreeSet<String> = desired
            .iter()
            .filter_map(|s| s.metadata.name.clone())
            .collect();

        for service in desired {
            report.record(
                self.converge_one(ManagedResource::NetworkEndpoint(service))
                    .await?,
            );
        }

        let observed = self
            .plane
            .list(ResourceKind::NetworkEndpoint, namespace, selector)
            .await?;
        for stale in observed.iter().filter(|r| !wanted.contains(r.name())) {
            if !owns(stale.meta(), self.owner) {
                report.record(Outcome::SkippedForeign);
                continue;
            }
            self.plane.delete(stale).await?;
            info!(resource = %stale.name(), "deleted endpoint no longer desired");
            report.record(Outcome::Deleted);
        }
        Ok(report)
    }

    /// Converge every resource of an enabled component in kind order.
    ///
    /// The workload must already carry its config fingerprint. Optional
    /// resources that are no longer desired are removed by name.
    pub async fn converge_bundle(
        &self,
        namespace: &str,
        parent: &str,
        component: ComponentKind,
        bundle: DesiredBundle,
        monitors: MonitorSupport,
    ) -> Result<ConvergeReport, Error> {
        let mut report = ConvergeReport::default();
        let name = resource_name(parent, component);

        if let Some(config) = bundle.config {
            report.record(self.converge_one(ManagedResource::ConfigBundle(config)).await?);
        }
        if let Some(workload) = bundle.workload {
            report.record(self.converge_one(ManagedResource::Workload(workload)).await?);
        }

        report.merge(
            self.converge_endpoints(
                namespace,
                &endpoint_selector(parent, component),
                bundle.endpoints,
            )
            .await?,
        );

        if let Some(store) = bundle.store {
            report.record(self.converge_one(ManagedResource::PersistentStore(store)).await?);
        }

        match bundle.identity {
            Some(identity) => {
                report.record(self.converge_one(ManagedResource::Identity(identity)).await?)
            }
            None => report.record(self.remove(ResourceKind::Identity, namespace, &name).await?),
        }

        if monitors.supported() {
            match bundle.monitor {
                Some(monitor) => report
                    .record(self.converge_one(ManagedResource::MetricsMonitor(monitor)).await?),
                None => report.record(
                    self.remove(ResourceKind::MetricsMonitor, namespace, &name)
                        .await?,
                ),
            }
        } else if bundle.monitor.is_some() {
            debug!(component = %component, ?monitors, "metrics monitor skipped");
        }

        Ok(report)
    }

    /// Delete everything a disabled component could have created.
    ///
    /// Resources are located by deterministic name, not by listing, and only
    /// deleted when owned.
    pub async fn teardown(
        &self,
        namespace: &str,
        parent: &str,
        component: ComponentKind,
        monitors: MonitorSupport,
    ) -> Result<ConvergeReport, Error> {
        let mut report = ConvergeReport::default();
        for (kind, name) in teardown_targets(parent, component) {
            if kind == ResourceKind::MetricsMonitor && !monitors.supported() {
                continue;
            }
            report.record(self.remove(kind, namespace, &name).await?);
        }
        Ok(report)
    }
}

/// Every (kind, name) a component may own, in kind order
pub fn teardown_targets(parent: &str, component: ComponentKind) -> Vec<(ResourceKind, String)> {
    let descriptor = component.descriptor();
    let name = resource_name(parent, component);
    let mut targets = Vec::new();
    for kind in ResourceKind::ORDER {
        match kind {
            ResourceKind::NetworkEndpoint => {
                targets.extend(active_endpoints(descriptor, true).into_iter().map(|e| {
                    (kind, endpoint_service_name(parent, component, e.name))
                }));
            }
            ResourceKind::PersistentStore if descriptor.storage.is_none() => {}
            ResourceKind::MetricsMonitor if !descriptor.metrics_capable => {}
            _ => targets.push((kind, name.clone())),
        }
    }
    targets
}

// =============================================================================
// Equality on owned fields
// =============================================================================

/// Desired and observed agree on every field this engine controls
pub fn in_sync(desired: &ManagedResource, observed: &ManagedResource) -> bool {
    if !meta_contains(observed.meta(), desired.meta()) {
        return false;
    }
    match (desired, observed) {
        (ManagedResource::ConfigBundle(d), ManagedResource::ConfigBundle(o)) => config_in_sync(d, o),
        (ManagedResource::Workload(d), ManagedResource::Workload(o)) => workload_in_sync(d, o),
        (ManagedResource::NetworkEndpoint(d), ManagedResource::NetworkEndpoint(o)) => {
            endpoint_in_sync(d, o)
        }
        (ManagedResource::PersistentStore(d), ManagedResource::PersistentStore(o)) => {
            store_in_sync(d, o)
        }
        (ManagedResource::Identity(d), ManagedResource::Identity(o)) => identity_in_sync(d, o),
        (ManagedResource::MetricsMonitor(d), ManagedResource::MetricsMonitor(o)) => {
            monitor_in_sync(d, o)
        }
        _ => false,
    }
}

fn subset(observed: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    desired
        .into_iter()
        .flatten()
        .all(|(k, v)| observed.and_then(|o| o.get(k)) == Some(v))
}

fn meta_contains(observed: &ObjectMeta, desired: &ObjectMeta) -> bool {
    subset(observed.labels.as_ref(), desired.labels.as_ref())
        && subset(observed.annotations.as_ref(), desired.annotations.as_ref())
}

fn config_in_sync(desired: &ConfigMap, observed: &ConfigMap) -> bool {
    desired.data.clone().unwrap_or_default() == observed.data.clone().unwrap_or_default()
        && desired.binary_data.clone().unwrap_or_default()
            == observed.binary_data.clone().unwrap_or_default()
}

/// Compares the container fields the compiler sets
fn container_matches(d: &Container, o: &Container) -> bool {
    d.name == o.name
        && d.image == o.image
        && d.command == o.command
        && d.args == o.args
        && d.env.as_deref().unwrap_or_default() == o.env.as_deref().unwrap_or_default()
        && d.ports.as_deref().unwrap_or_default() == o.ports.as_deref().unwrap_or_default()
        && d.volume_mounts.as_deref().unwrap_or_default()
            == o.volume_mounts.as_deref().unwrap_or_default()
}

fn containers_match(desired: &[Container], observed: &[Container]) -> bool {
    desired.len() == observed.len()
        && desired
            .iter()
            .zip(observed)
            .all(|(d, o)| container_matches(d, o))
}

fn pod_in_sync(desired: &PodSpec, observed: &PodSpec) -> bool {
    desired.service_account_name == observed.service_account_name
        && containers_match(&desired.containers, &observed.containers)
        && containers_match(
            desired.init_containers.as_deref().unwrap_or_default(),
            observed.init_containers.as_deref().unwrap_or_default(),
        )
}

fn workload_in_sync(desired: &Deployment, observed: &Deployment) -> bool {
    let (Some(d), Some(o)) = (&desired.spec, &observed.spec) else {
        return desired.spec.is_none();
    };
    let template_meta_ok = match (&d.template.metadata, &o.template.metadata) {
        (Some(dm), Some(om)) => meta_contains(om, dm),
        (Some(_), None) => false,
        (None, _) => true,
    };
    let strategy_ok = d.strategy.as_ref().and_then(|s| s.type_.as_ref()).is_none_or(|t| {
        o.strategy.as_ref().and_then(|s| s.type_.as_ref()) == Some(t)
    });
    let pod_ok = match (&d.template.spec, &o.template.spec) {
        (Some(dp), Some(op)) => pod_in_sync(dp, op),
        (Some(_), None) => false,
        (None, _) => true,
    };
    d.replicas == o.replicas && template_meta_ok && strategy_ok && pod_ok
}

/// `nodePort` is cluster-assigned and not compared
fn port_matches(d: &ServicePort, o: &ServicePort) -> bool {
    d.name == o.name
        && d.port == o.port
        && d.protocol.as_deref().unwrap_or("TCP") == o.protocol.as_deref().unwrap_or("TCP")
        && d.target_port == o.target_port
}

fn endpoint_in_sync(desired: &Service, observed: &Service) -> bool {
    let (Some(d), Some(o)) = (&desired.spec, &observed.spec) else {
        return desired.spec.is_none();
    };
    let d_ports = d.ports.as_deref().unwrap_or_default();
    let o_ports = o.ports.as_deref().unwrap_or_default();
    d.selector == o.selector
        && d.type_.as_deref().unwrap_or("ClusterIP") == o.type_.as_deref().unwrap_or("ClusterIP")
        && d.publish_not_ready_addresses.unwrap_or(false)
            == o.publish_not_ready_addresses.unwrap_or(false)
        && d_ports.len() == o_ports.len()
        && d_ports
            .iter()
            .zip(o_ports)
            .all(|(dp, op)| port_matches(dp, op))
}

fn store_in_sync(desired: &PersistentVolumeClaim, observed: &PersistentVolumeClaim) -> bool {
    let (Some(d), Some(o)) = (&desired.spec, &observed.spec) else {
        return desired.spec.is_none();
    };
    let storage = |spec: &k8s_openapi::api::core::v1::PersistentVolumeClaimSpec| {
        spec.resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .cloned()
    };
    d.access_modes == o.access_modes && storage(d) == storage(o)
}

fn identity_in_sync(desired: &ServiceAccount, observed: &ServiceAccount) -> bool {
    desired.automount_service_account_token == observed.automount_service_account_token
}

fn monitor_in_sync(desired: &DynamicObject, observed: &DynamicObject) -> bool {
    desired.data.get("spec") == observed.data.get("spec")
}

// =============================================================================
// Update construction
// =============================================================================

/// Observed resource with the owned fields overwritten from desired.
///
/// Cluster-assigned fields (resource version, uid, cluster IPs, node ports,
/// foreign labels and annotations) are carried over from observed.
pub fn merge_owned(
    desired: ManagedResource,
    observed: ManagedResource,
) -> Result<ManagedResource, Error> {
    let merged = match (desired, observed) {
        (ManagedResource::ConfigBundle(d), ManagedResource::ConfigBundle(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            o.data = d.data;
            o.binary_data = d.binary_data;
            ManagedResource::ConfigBundle(o)
        }
        (ManagedResource::Workload(d), ManagedResource::Workload(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            merge_workload(&mut o, d);
            ManagedResource::Workload(o)
        }
        (ManagedResource::NetworkEndpoint(d), ManagedResource::NetworkEndpoint(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            merge_endpoint(&mut o, d);
            ManagedResource::NetworkEndpoint(o)
        }
        (ManagedResource::PersistentStore(d), ManagedResource::PersistentStore(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            match (o.spec.as_mut(), d.spec) {
                (Some(os), Some(ds)) => {
                    os.access_modes = ds.access_modes;
                    os.resources = ds.resources;
                }
                (None, ds) => o.spec = ds,
                (Some(_), None) => {}
            }
            ManagedResource::PersistentStore(o)
        }
        (ManagedResource::Identity(d), ManagedResource::Identity(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            o.automount_service_account_token = d.automount_service_account_token;
            ManagedResource::Identity(o)
        }
        (ManagedResource::MetricsMonitor(d), ManagedResource::MetricsMonitor(mut o)) => {
            merge_meta(&mut o.metadata, &d.metadata);
            if let Some(spec) = d.data.get("spec") {
                o.data["spec"] = spec.clone();
            }
            ManagedResource::MetricsMonitor(o)
        }
        (d, o) => {
            return Err(Error::internal_with_context(
                "merge",
                format!("kind mismatch: desired {} observed {}", d.kind(), o.kind()),
            ))
        }
    };
    Ok(merged)
}

fn merge_meta(observed: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = &desired.labels {
        observed
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if let Some(annotations) = &desired.annotations {
        observed
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
}

fn merge_workload(observed: &mut Deployment, desired: Deployment) {
    let Some(d) = desired.spec else {
        return;
    };
    let Some(o) = observed.spec.as_mut() else {
        observed.spec = Some(d);
        return;
    };
    o.replicas = d.replicas;
    if d.strategy.is_some() {
        o.strategy = d.strategy;
    }
    if let Some(dm) = &d.template.metadata {
        merge_meta(o.template.metadata.get_or_insert_with(Default::default), dm);
    }
    if d.template.spec.is_some() {
        o.template.spec = d.template.spec;
    }
}

fn merge_endpoint(observed: &mut Service, desired: Service) {
    let Some(d) = desired.spec else {
        return;
    };
    let Some(o) = observed.spec.as_mut() else {
        observed.spec = Some(d);
        return;
    };

    let keeps_node_ports = d.type_.as_deref().unwrap_or("ClusterIP") != "ClusterIP";
    let allocated: BTreeMap<String, i32> = o
        .ports
        .iter()
        .flatten()
        .filter_map(|p| Some((p.name.clone()?, p.node_port?)))
        .collect();

    o.ports = d.ports.map(|ports| {
        ports
            .into_iter()
            .map(|mut p| {
                if keeps_node_ports && p.node_port.is_none() {
                    p.node_port = p.name.as_ref().and_then(|n| allocated.get(n)).copied();
                }
                p
            })
            .collect()
    });
    o.selector = d.selector;
    o.type_ = d.type_;
    o.publish_not_ready_addresses = d.publish_not_ready_addresses;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockControlPlane;
    use crate::compiler::{DesiredStateCompiler, Open5GSCompiler};
    use crate::fingerprint::{fingerprint, stamp, stamped};
    use crate::normalize::normalize;
    use crate::testing::{api_error, FakeControlPlane};
    use k8s_openapi::api::core::v1::ServiceSpec;
    use open5gs_common::crd::{EndpointOverride, NetworkFunction, Open5GSSpec};

    const NS: &str = "5g";

    fn owner(uid: &str) -> Owner {
        Owner {
            api_version: "net.gradiant.org/v1".to_string(),
            kind: "Open5GS".to_string(),
            name: "core".to_string(),
            namespace: NS.to_string(),
            uid: uid.to_string(),
        }
    }

    fn desired_bundle(spec: &Open5GSSpec, component: ComponentKind) -> DesiredBundle {
        let mut bundle = Open5GSCompiler
            .compile("core", NS, &normalize(spec), component)
            .expect("compiles");
        if let (Some(config), Some(workload)) = (&bundle.config, bundle.workload.as_mut()) {
            stamp(workload, &fingerprint(config));
        }
        bundle
    }

    async fn pass(
        plane: &FakeControlPlane,
        owner: &Owner,
        spec: &Open5GSSpec,
        component: ComponentKind,
    ) -> ConvergeReport {
        let engine = ConvergenceEngine::new(plane, owner);
        if normalize(spec).settings(component).enabled {
            engine
                .converge_bundle(
                    NS,
                    "core",
                    component,
                    desired_bundle(spec, component),
                    MonitorSupport::Supported,
                )
                .await
                .expect("converges")
        } else {
            engine
                .teardown(NS, "core", component, MonitorSupport::Supported)
                .await
                .expect("tears down")
        }
    }

    fn foreign_meta(name: &str, component: ComponentKind) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            labels: Some(crate::compiler::selector_labels("core", component)),
            ..Default::default()
        }
    }

    fn foreign_service(name: &str, component: ComponentKind) -> ManagedResource {
        ManagedResource::NetworkEndpoint(Service {
            metadata: foreign_meta(name, component),
            spec: Some(ServiceSpec::default()),
            ..Default::default()
        })
    }

    // =========================================================================
    // Story: create then idle
    // =========================================================================

    /// Story: a fresh component is created, and a second pass is a no-op
    #[tokio::test]
    async fn story_second_pass_issues_no_mutations() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        let spec = Open5GSSpec::default();

        let first = pass(&plane, &owner, &spec, ComponentKind::Amf).await;
        assert_eq!(first.created, 5, "config, workload, sbi, ngap, metrics");
        assert_eq!(plane.mutations(), 5);

        let workload = plane
            .object(ResourceKind::Workload, NS, "core-amf")
            .expect("workload");
        let ManagedResource::Workload(workload) = workload else {
            panic!("expected a workload");
        };
        assert!(stamped(&workload).is_some());

        let second = pass(&plane, &owner, &spec, ComponentKind::Amf).await;
        assert_eq!(second.mutations(), 0);
        assert_eq!(plane.mutations(), 5);
    }

    /// Story: every component of a default spec reaches a fixed point
    #[tokio::test]
    async fn story_every_component_is_idempotent() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        let spec = Open5GSSpec {
            webui: Some(NetworkFunction {
                enabled: Some(true),
                service_account: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        for component in ComponentKind::ALL {
            pass(&plane, &owner, &spec, component).await;
        }
        let after_first = plane.mutations();
        for component in ComponentKind::ALL {
            let report = pass(&plane, &owner, &spec, component).await;
            assert_eq!(report.mutations(), 0, "{component} drifted");
        }
        assert_eq!(plane.mutations(), after_first);
    }

    // =========================================================================
    // Story: configuration drift
    // =========================================================================

    /// Story: a config-only edit rolls the workload through its fingerprint
    #[tokio::test]
    async fn story_config_edit_updates_workload_via_fingerprint() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Nrf).await;
        let before = match plane.object(ResourceKind::Workload, NS, "core-nrf") {
            Some(ManagedResource::Workload(w)) => stamped(&w).map(str::to_string),
            _ => None,
        };

        let edited = Open5GSSpec {
            configuration: Some(open5gs_common::crd::CoreConfiguration {
                mcc: Some("001".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = pass(&plane, &owner, &edited, ComponentKind::Nrf).await;
        assert_eq!(report.updated, 2, "config bundle and workload");

        let after = match plane.object(ResourceKind::Workload, NS, "core-nrf") {
            Some(ManagedResource::Workload(w)) => stamped(&w).map(str::to_string),
            _ => None,
        };
        assert_ne!(before, after);
    }

    /// Story: labels added by other tools are preserved and not treated as drift
    #[tokio::test]
    async fn story_foreign_labels_survive_and_do_not_drift() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        let spec = Open5GSSpec::default();
        pass(&plane, &owner, &spec, ComponentKind::Ausf).await;

        plane.edit(ResourceKind::ConfigBundle, NS, "core-ausf", |r| {
            r.meta_mut()
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("team".to_string(), "radio".to_string());
        });
        let report = pass(&plane, &owner, &spec, ComponentKind::Ausf).await;
        assert_eq!(report.mutations(), 0);
    }

    // =========================================================================
    // Story: ownership
    // =========================================================================

    /// Story: a user's Service under one of our names is never touched
    #[tokio::test]
    async fn story_foreign_resource_is_never_mutated() {
        let mut plane = MockControlPlane::new();
        plane.expect_get().returning(|kind, ns, name| {
            Ok(Some(match kind {
                ResourceKind::NetworkEndpoint => foreign_service(name, ComponentKind::Ausf),
                _ => ManagedResource::ConfigBundle(ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(ns.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            }))
        });
        plane.expect_create().never();
        plane.expect_replace().never();
        plane.expect_delete().never();

        let owner = owner("uid-core");
        let engine = ConvergenceEngine::new(&plane, &owner);
        let desired = desired_bundle(&Open5GSSpec::default(), ComponentKind::Ausf);
        let outcome = engine
            .converge_one(ManagedResource::ConfigBundle(desired.config.expect("config")))
            .await
            .expect("converges");
        assert_eq!(outcome, Outcome::SkippedForeign);

        let outcome = engine
            .remove(ResourceKind::NetworkEndpoint, NS, "core-ausf-sbi")
            .await
            .expect("checks");
        assert_eq!(outcome, Outcome::SkippedForeign);
    }

    /// Story: another parent's resources are foreign even with a similar uid
    #[tokio::test]
    async fn story_uid_prefix_is_not_ownership() {
        let plane = FakeControlPlane::new();
        pass(&plane, &owner("uid-core-2"), &Open5GSSpec::default(), ComponentKind::Bsf).await;
        let before = plane.mutations();

        let disabled = Open5GSSpec {
            bsf: Some(NetworkFunction {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = pass(&plane, &owner("uid-core"), &disabled, ComponentKind::Bsf).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped_foreign, 3);
        assert_eq!(plane.mutations(), before);
    }

    // =========================================================================
    // Story: disable and scoped deletion
    // =========================================================================

    /// Story: disabling a component deletes exactly its owned resources
    #[tokio::test]
    async fn story_disable_deletes_owned_and_spares_foreign() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        let spec = Open5GSSpec::default();
        pass(&plane, &owner, &spec, ComponentKind::Nrf).await;
        pass(&plane, &owner, &spec, ComponentKind::Scp).await;
        plane.seed(ManagedResource::Identity(ServiceAccount {
            metadata: foreign_meta("core-nrf", ComponentKind::Nrf),
            ..Default::default()
        }));

        let disabled = Open5GSSpec {
            nrf: Some(NetworkFunction {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = pass(&plane, &owner, &disabled, ComponentKind::Nrf).await;
        assert_eq!(report.deleted, 3, "config, workload, sbi");
        assert_eq!(report.skipped_foreign, 1);

        assert!(plane.object(ResourceKind::Identity, NS, "core-nrf").is_some());
        let services = plane.names(ResourceKind::NetworkEndpoint);
        assert!(services.contains(&"core-scp-sbi".to_string()));
        assert!(!services.contains(&"core-nrf-sbi".to_string()));
        assert!(plane.object(ResourceKind::Workload, NS, "core-scp").is_some());

        let again = pass(&plane, &owner, &disabled, ComponentKind::Nrf).await;
        assert_eq!(again.mutations(), 0);
    }

    /// Story: turning metrics off removes the metrics endpoint only
    #[tokio::test]
    async fn story_endpoint_no_longer_desired_is_deleted() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Smf).await;
        plane.seed(foreign_service("core-smf-debug", ComponentKind::Smf));

        let no_metrics = Open5GSSpec {
            smf: Some(NetworkFunction {
                metrics: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = pass(&plane, &owner, &no_metrics, ComponentKind::Smf).await;
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped_foreign, 1);
        let services = plane.names(ResourceKind::NetworkEndpoint);
        assert!(!services.contains(&"core-smf-metrics".to_string()));
        assert!(services.contains(&"core-smf-pfcp".to_string()));
        assert!(services.contains(&"core-smf-debug".to_string()));
    }

    /// Story: identity and monitor are removed when switched off
    #[tokio::test]
    async fn story_optional_resources_follow_flags() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        let on = Open5GSSpec {
            upf: Some(NetworkFunction {
                service_account: Some(true),
                service_monitor: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        pass(&plane, &owner, &on, ComponentKind::Upf).await;
        assert!(plane.object(ResourceKind::Identity, NS, "core-upf").is_some());
        assert!(plane.object(ResourceKind::MetricsMonitor, NS, "core-upf").is_some());

        let report = pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Upf).await;
        assert_eq!(report.deleted, 2);
        assert!(plane.object(ResourceKind::Identity, NS, "core-upf").is_none());
        assert!(plane.object(ResourceKind::MetricsMonitor, NS, "core-upf").is_none());
    }

    #[tokio::test]
    async fn unsupported_monitor_kind_is_never_touched() {
        let plane = FakeControlPlane::new();
        plane.fail(ResourceKind::MetricsMonitor, 404);
        let owner = owner("uid-core");
        let spec = Open5GSSpec {
            amf: Some(NetworkFunction {
                service_monitor: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let engine = ConvergenceEngine::new(&plane, &owner);
        engine
            .converge_bundle(
                NS,
                "core",
                ComponentKind::Amf,
                desired_bundle(&spec, ComponentKind::Amf),
                MonitorSupport::Unsupported,
            )
            .await
            .expect("converges without monitor");
        engine
            .teardown(NS, "core", ComponentKind::Amf, MonitorSupport::Unknown)
            .await
            .expect("tears down without monitor");
    }

    // =========================================================================
    // Services keep cluster-assigned fields
    // =========================================================================

    #[tokio::test]
    async fn exposure_change_keeps_cluster_ip() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Upf).await;
        let ip_before = match plane.object(ResourceKind::NetworkEndpoint, NS, "core-upf-gtpu") {
            Some(ManagedResource::NetworkEndpoint(s)) => s.spec.and_then(|s| s.cluster_ip),
            _ => None,
        };
        assert!(ip_before.is_some());

        let exposed = Open5GSSpec {
            upf: Some(NetworkFunction {
                service: vec![EndpointOverride {
                    name: "gtpu".to_string(),
                    service_type: Some("NodePort".to_string()),
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = pass(&plane, &owner, &exposed, ComponentKind::Upf).await;
        assert_eq!(report.updated, 1);

        let Some(ManagedResource::NetworkEndpoint(svc)) =
            plane.object(ResourceKind::NetworkEndpoint, NS, "core-upf-gtpu")
        else {
            panic!("service missing");
        };
        let spec = svc.spec.expect("spec");
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.cluster_ip, ip_before);
    }

    #[test]
    fn node_port_is_kept_for_matching_port_name() {
        let port = |node_port| ServicePort {
            name: Some("gtpu".to_string()),
            port: 2152,
            node_port,
            ..Default::default()
        };
        let svc = |type_: &str, node_port| Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                ports: Some(vec![port(node_port)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = merge_owned(
            ManagedResource::NetworkEndpoint(svc("NodePort", None)),
            ManagedResource::NetworkEndpoint(svc("NodePort", Some(31000))),
        )
        .expect("merges");
        let ManagedResource::NetworkEndpoint(merged) = merged else {
            panic!("kind changed");
        };
        assert_eq!(
            merged.spec.and_then(|s| s.ports).expect("ports")[0].node_port,
            Some(31000)
        );

        let to_cluster_ip = merge_owned(
            ManagedResource::NetworkEndpoint(svc("ClusterIP", None)),
            ManagedResource::NetworkEndpoint(svc("NodePort", Some(31000))),
        )
        .expect("merges");
        let ManagedResource::NetworkEndpoint(merged) = to_cluster_ip else {
            panic!("kind changed");
        };
        assert_eq!(
            merged.spec.and_then(|s| s.ports).expect("ports")[0].node_port,
            None
        );
    }

    #[test]
    fn merge_rejects_kind_mismatch() {
        let err = merge_owned(
            ManagedResource::ConfigBundle(ConfigMap::default()),
            ManagedResource::Identity(ServiceAccount::default()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("kind mismatch"));
    }

    // =========================================================================
    // Failures
    // =========================================================================

    /// Story: a concurrent writer wins; the pass stops and the next one retries
    #[tokio::test]
    async fn story_conflict_aborts_and_next_pass_converges() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Udm).await;

        let mut desired = desired_bundle(&Open5GSSpec::default(), ComponentKind::Udm)
            .config
            .expect("config");
        desired
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert("extra".to_string(), "1".to_string());

        // Observed copy read before another actor bumps the version
        let stale = plane
            .object(ResourceKind::ConfigBundle, NS, "core-udm")
            .expect("exists");
        plane.edit(ResourceKind::ConfigBundle, NS, "core-udm", |_| {});
        let merged = merge_owned(ManagedResource::ConfigBundle(desired.clone()), stale)
            .expect("merges");
        let err = plane.replace(&merged).await.unwrap_err();
        assert!(err.is_conflict());

        let engine = ConvergenceEngine::new(&plane, &owner);
        let outcome = engine
            .converge_one(ManagedResource::ConfigBundle(desired))
            .await
            .expect("fresh read converges");
        assert_eq!(outcome, Outcome::Updated);
    }

    /// Story: a same-named object recreated after our read is not deleted
    #[tokio::test]
    async fn story_delete_targets_the_observed_object_only() {
        let plane = FakeControlPlane::new();
        let owner = owner("uid-core");
        pass(&plane, &owner, &Open5GSSpec::default(), ComponentKind::Pcf).await;

        let observed = plane
            .object(ResourceKind::ConfigBundle, NS, "core-pcf")
            .expect("exists");
        plane.edit(ResourceKind::ConfigBundle, NS, "core-pcf", |r| {
            r.meta_mut().uid = Some("uid-recreated".to_string());
        });

        let err = plane.delete(&observed).await.unwrap_err();
        assert!(err.is_conflict());
        let kept = plane
            .object(ResourceKind::ConfigBundle, NS, "core-pcf")
            .expect("recreated object kept");
        assert_eq!(kept.meta().uid.as_deref(), Some("uid-recreated"));
        assert_eq!(plane.deletes(), 0);
    }

    #[tokio::test]
    async fn remove_deletes_with_the_observed_uid() {
        let mut plane = MockControlPlane::new();
        let owner = owner("uid-core");
        let owned = {
            let mut meta = foreign_meta("core-nssf", ComponentKind::Nssf);
            meta.uid = Some("uid-cm-1".to_string());
            let mut cm = ManagedResource::ConfigBundle(ConfigMap {
                metadata: meta,
                ..Default::default()
            });
            mark(cm.meta_mut(), &owner);
            cm
        };
        plane
            .expect_get()
            .returning(move |_, _, _| Ok(Some(owned.clone())));
        plane
            .expect_delete()
            .times(1)
            .withf(|r| r.meta().uid.as_deref() == Some("uid-cm-1"))
            .returning(|_| Err(api_error(409, "Conflict")));

        let engine = ConvergenceEngine::new(&plane, &owner);
        let err = engine
            .remove(ResourceKind::ConfigBundle, NS, "core-nssf")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    /// Story: a failing kind aborts the rest of the component's pass
    #[tokio::test]
    async fn story_failure_keeps_earlier_kinds_applied() {
        let plane = FakeControlPlane::new();
        plane.fail(ResourceKind::NetworkEndpoint, 403);
        let owner = owner("uid-core");
        let engine = ConvergenceEngine::new(&plane, &owner);
        let err = engine
            .converge_bundle(
                NS,
                "core",
                ComponentKind::Ausf,
                desired_bundle(&Open5GSSpec::default(), ComponentKind::Ausf),
                MonitorSupport::Supported,
            )
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
        assert!(plane.object(ResourceKind::ConfigBundle, NS, "core-ausf").is_some());
        assert!(plane.object(ResourceKind::Workload, NS, "core-ausf").is_some());
    }

    #[tokio::test]
    async fn not_found_on_read_takes_create_path() {
        let mut plane = MockControlPlane::new();
        plane.expect_get().returning(|_, _, _| Ok(None));
        plane
            .expect_create()
            .times(1)
            .withf(|r| r.meta().owner_references.as_ref().is_some_and(|o| o.len() == 1))
            .returning(|r| Ok(r.clone()));
        let owner = owner("uid-core");
        let engine = ConvergenceEngine::new(&plane, &owner);
        let outcome = engine
            .converge_one(ManagedResource::Identity(ServiceAccount {
                metadata: ObjectMeta {
                    name: Some("core-nrf".to_string()),
                    namespace: Some(NS.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }))
            .await
            .expect("creates");
        assert_eq!(outcome, Outcome::Created);
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_get()
            .returning(|_, _, _| Err(api_error(500, "InternalError")));
        let owner = owner("uid-core");
        let engine = ConvergenceEngine::new(&plane, &owner);
        let err = engine
            .remove(ResourceKind::Workload, NS, "core-amf")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn teardown_targets_cover_catalogue_names() {
        let names: Vec<String> = teardown_targets("core", ComponentKind::MongoDb)
            .into_iter()
            .map(|(_, n)| n)
            .collect();
        assert_eq!(
            names,
            vec!["core-mongodb", "core-mongodb", "core-mongodb", "core-mongodb", "core-mongodb"]
        );

        let kinds: Vec<ResourceKind> = teardown_targets("core", ComponentKind::Amf)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert!(kinds.contains(&ResourceKind::MetricsMonitor));
        assert!(!kinds.contains(&ResourceKind::PersistentStore));
    }
}
