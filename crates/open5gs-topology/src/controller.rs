//! Open5GS reconcile loop
//!
//! One pass normalizes the spec, probes for the metrics monitor kind, then
//! walks the catalogue: enabled components are compiled, stamped with their
//! config fingerprint and converged; disabled ones are torn down. Components
//! are independent, so one failing component does not stop the others.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use open5gs_common::crd::{Open5GS, Open5GSStatus};
use open5gs_common::events::{actions, reasons, EventPublisher};
use open5gs_common::Error;

use crate::client::ControlPlane;
use crate::compiler::DesiredStateCompiler;
use crate::component::ComponentKind;
use crate::engine::{ConvergeReport, ConvergenceEngine, MonitorSupport};
use crate::fingerprint::{fingerprint, stamp};
use crate::normalize::{normalize, NormalizedSpec};
use crate::ownership::Owner;
use crate::probe::CapabilityProbe;
use crate::resources::ResourceKind;

/// Default delay between passes
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);

/// Shared state of the Open5GS controller
pub struct Open5GSContext {
    /// Cluster access for managed resources
    pub plane: Arc<dyn ControlPlane>,
    /// Optional-kind discovery
    pub probe: Arc<dyn CapabilityProbe>,
    /// Desired-state compiler
    pub compiler: Arc<dyn DesiredStateCompiler>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Delay before the next pass, whatever the outcome
    pub requeue: Duration,
}

impl Open5GSContext {
    /// Create a context with the default requeue interval
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        probe: Arc<dyn CapabilityProbe>,
        compiler: Arc<dyn DesiredStateCompiler>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            plane,
            probe,
            compiler,
            events,
            requeue: DEFAULT_REQUEUE,
        }
    }

    /// Override the requeue interval
    pub fn with_requeue(mut self, requeue: Duration) -> Self {
        self.requeue = requeue;
        self
    }
}

/// Reconcile one Open5GS object
#[instrument(skip(open5gs, ctx), fields(open5gs = %open5gs.name_any()))]
pub async fn reconcile(open5gs: Arc<Open5GS>, ctx: Arc<Open5GSContext>) -> Result<Action, Error> {
    if open5gs.meta().deletion_timestamp.is_some() {
        debug!("being deleted, children are garbage-collected through owner references");
        return Ok(Action::await_change());
    }

    let name = open5gs.name_any();
    let namespace = open5gs
        .namespace()
        .ok_or_else(|| Error::validation("Open5GS object has no namespace"))?;
    let owner = Owner::of(&open5gs)?;
    let spec = normalize(&open5gs.spec);
    let monitors = probe_monitors(ctx.probe.as_ref()).await;
    let engine = ConvergenceEngine::new(ctx.plane.as_ref(), &owner);

    let mut total = ConvergeReport::default();
    let mut failed = Vec::new();
    for component in ComponentKind::ALL {
        match converge_component(
            &engine,
            ctx.compiler.as_ref(),
            &name,
            &namespace,
            &spec,
            component,
            monitors,
        )
        .await
        {
            Ok(report) => {
                announce(&open5gs, ctx.events.as_ref(), &spec, component, &report).await;
                total.merge(report);
            }
            Err(e) => {
                warn!(component = %component, error = %e, retryable = e.is_retryable(), "component failed to converge");
                ctx.events
                    .publish(
                        &open5gs.object_ref(&()),
                        EventType::Warning,
                        reasons::COMPONENT_FAILED,
                        actions::RECONCILE,
                        Some(format!("{component}: {e}")),
                    )
                    .await;
                failed.push(component);
            }
        }
    }

    info!(
        created = total.created,
        updated = total.updated,
        deleted = total.deleted,
        skipped_foreign = total.skipped_foreign,
        failed = failed.len(),
        "pass complete"
    );

    let status = pass_status(&failed, open5gs.meta().generation);
    let previous = open5gs.status.as_ref();
    if previous != Some(&status) {
        ctx.plane.patch_status(&namespace, &name, &status).await?;
        if status.ready && !previous.is_some_and(|s| s.ready) {
            ctx.events
                .publish(
                    &open5gs.object_ref(&()),
                    EventType::Normal,
                    reasons::CONVERGED,
                    actions::RECONCILE,
                    Some("All components converged".to_string()),
                )
                .await;
        }
    }

    Ok(Action::requeue(ctx.requeue))
}

/// Error policy: the same fixed interval as a successful pass
pub fn error_policy(open5gs: Arc<Open5GS>, error: &Error, ctx: Arc<Open5GSContext>) -> Action {
    error!(
        ?error,
        open5gs = %open5gs.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue)
}

/// Events for what a component's pass did beyond plain convergence
async fn announce(
    open5gs: &Open5GS,
    events: &dyn EventPublisher,
    spec: &NormalizedSpec,
    component: ComponentKind,
    report: &ConvergeReport,
) {
    let object_ref = open5gs.object_ref(&());
    if !spec.settings(component).enabled && report.deleted > 0 {
        events
            .publish(
                &object_ref,
                EventType::Normal,
                reasons::COMPONENT_REMOVED,
                actions::TEARDOWN,
                Some(format!("{component}: deleted {} resources", report.deleted)),
            )
            .await;
    }
    if report.skipped_foreign > 0 {
        events
            .publish(
                &object_ref,
                EventType::Warning,
                reasons::FOREIGN_RESOURCE,
                actions::RECONCILE,
                Some(format!(
                    "{component}: {} resources exist under our names without our owner reference",
                    report.skipped_foreign
                )),
            )
            .await;
    }
}

async fn probe_monitors(probe: &dyn CapabilityProbe) -> MonitorSupport {
    match probe.is_supported(ResourceKind::MetricsMonitor).await {
        Ok(true) => MonitorSupport::Supported,
        Ok(false) => MonitorSupport::Unsupported,
        Err(e) => {
            warn!(error = %e, "metrics monitor probe failed, skipping monitors this pass");
            MonitorSupport::Unknown
        }
    }
}

/// compile, stamp, converge; or tear down when disabled
async fn converge_component(
    engine: &ConvergenceEngine<'_>,
    compiler: &dyn DesiredStateCompiler,
    parent: &str,
    namespace: &str,
    spec: &NormalizedSpec,
    component: ComponentKind,
    monitors: MonitorSupport,
) -> Result<ConvergeReport, Error> {
    if !spec.settings(component).enabled {
        let report = engine
            .teardown(namespace, parent, component, monitors)
            .await?;
        if report.deleted > 0 {
            info!(component = %component, deleted = report.deleted, "disabled component removed");
        }
        return Ok(report);
    }

    let mut bundle = compiler.compile(parent, namespace, spec, component)?;
    if let (Some(config), Some(workload)) = (&bundle.config, bundle.workload.as_mut()) {
        stamp(workload, &fingerprint(config));
    }
    engine
        .converge_bundle(namespace, parent, component, bundle, monitors)
        .await
}

fn pass_status(failed: &[ComponentKind], generation: Option<i64>) -> Open5GSStatus {
    Open5GSStatus {
        ready: failed.is_empty(),
        message: (!failed.is_empty()).then(|| {
            let names: Vec<&str> = failed.iter().map(|c| c.name()).collect();
            format!("failed to converge: {}", names.join(", "))
        }),
        observed_generation: generation,
    }
}

// =============================================================================
// Tests
// =============================================================================
