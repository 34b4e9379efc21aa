//! Controller runner: builds one future per controller
//!
//! Each `build_*` function returns a boxed future the caller can compose,
//! keeping construction separate from the runtime loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use open5gs_common::crd::{Open5GS, Open5GSUser};
use open5gs_common::events::KubeEventPublisher;
use open5gs_common::{LABEL_MANAGED_BY, OPERATOR_NAME};
use open5gs_subscriber::{KubeDatastoreResolver, KubeUserClient, MongoStoreConnector, UserContext};
use open5gs_topology::{KubeCapabilityProbe, KubeControlPlane, Open5GSCompiler, Open5GSContext};

/// Watcher timeout (seconds), kept below the client read timeout (30s) so
/// the API server closes idle watches before the client gives up on them
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Settings shared by both controllers
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerSettings {
    /// Fixed delay between passes of one object
    pub requeue: Duration,
    /// Objects reconciled in parallel per controller
    pub concurrency: u16,
    /// Port the subscriber datastore listens on
    pub datastore_port: u16,
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the Open5GS topology controller
pub fn build_topology_controller(client: Client, settings: &RunnerSettings) -> ControllerFuture {
    let ctx = Arc::new(
        Open5GSContext::new(
            Arc::new(KubeControlPlane::new(client.clone())),
            Arc::new(KubeCapabilityProbe::new(client.clone())),
            Arc::new(Open5GSCompiler),
            Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
        )
        .with_requeue(settings.requeue),
    );
    let deployments: Api<Deployment> = Api::all(client.clone());
    let managed = watcher_config().labels(&format!("{LABEL_MANAGED_BY}={OPERATOR_NAME}"));

    tracing::info!("- Open5GS controller");
    Box::pin(
        Controller::new(Api::<Open5GS>::all(client), watcher_config())
            .owns(deployments, managed)
            .with_config(ControllerConfig::default().concurrency(settings.concurrency))
            .shutdown_on_signal()
            .run(
                open5gs_topology::reconcile,
                open5gs_topology::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("Open5GS")),
    )
}

/// Build the Open5GSUser subscriber controller
pub fn build_subscriber_controller(client: Client, settings: &RunnerSettings) -> ControllerFuture {
    let ctx = Arc::new(
        UserContext::new(
            Arc::new(KubeUserClient::new(client.clone())),
            Arc::new(KubeDatastoreResolver::new(client.clone()).with_port(settings.datastore_port)),
            Arc::new(MongoStoreConnector::new()),
            Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
        )
        .with_requeue(settings.requeue),
    );

    tracing::info!("- Open5GSUser controller");
    Box::pin(
        Controller::new(Api::<Open5GSUser>::all(client), watcher_config())
            .with_config(ControllerConfig::default().concurrency(settings.concurrency))
            .shutdown_on_signal()
            .run(
                open5gs_subscriber::reconcile,
                open5gs_subscriber::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("Open5GSUser")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
