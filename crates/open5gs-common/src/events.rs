//! Kubernetes Event recording for the Open5GS controllers.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`.
    ///
    /// `reason` is machine-readable (see [`reasons`]), `action` names what the
    /// controller was doing (see [`actions`]).
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops everything. Used in tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Every enabled component converged
    pub const CONVERGED: &str = "Converged";
    /// A component failed to converge this pass
    pub const COMPONENT_FAILED: &str = "ComponentFailed";
    /// A disabled component's resources were removed
    pub const COMPONENT_REMOVED: &str = "ComponentRemoved";
    /// A resource with the expected name exists but belongs to someone else
    pub const FOREIGN_RESOURCE: &str = "ForeignResource";
    /// Subscriber written to the datastore
    pub const SUBSCRIBER_SYNCED: &str = "SubscriberSynced";
    /// Subscriber removed from the datastore
    pub const SUBSCRIBER_REMOVED: &str = "SubscriberRemoved";
    /// Datastore address could not be resolved
    pub const DATASTORE_UNAVAILABLE: &str = "DatastoreUnavailable";
    /// Declared fields are invalid
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Removing resources of a disabled component
    pub const TEARDOWN: &str = "Teardown";
    /// Writing to the subscriber datastore
    pub const SYNC: &str = "Sync";
    /// Finalizing a deleted object
    pub const FINALIZE: &str = "Finalize";
}
