//! Open5GSUser reconcile loop
//!
//! Mirrors each user into the subscriber datastore of the Open5GS object it
//! references. A finalizer is registered before the first datastore write so
//! that deleting the user always gets a chance to delete the record:
//!
//! - no finalizer, not deleting: register the finalizer, then sync
//! - finalizer, not deleting: upsert the record (skipped while the datastore
//!   is unresolved)
//! - finalizer, deleting: delete the record if the datastore resolves, then
//!   release the finalizer either way
//! - no finalizer, deleting: nothing left to do

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use open5gs_common::crd::{Open5GSUser, Open5GSUserStatus};
use open5gs_common::events::{actions, reasons, EventPublisher};
use open5gs_common::{Error, OPERATOR_NAME};

use crate::record::subscriber_document;
use crate::resolver::DatastoreResolver;
use crate::store::StoreConnector;

/// Finalizer guarding removal of the datastore record
pub const USER_FINALIZER: &str = "finalizer.open5gsuser.net.gradiant.org/user";

/// Default delay between passes
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);

/// Writes against Open5GSUser objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserClient: Send + Sync {
    /// Add [`USER_FINALIZER`] if it is not already present
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove [`USER_FINALIZER`], leaving any other finalizers in place
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &Open5GSUserStatus,
    ) -> Result<(), Error>;
}

/// [`UserClient`] backed by a kube client
#[derive(Clone)]
pub struct KubeUserClient {
    client: Client,
}

impl KubeUserClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Open5GSUser> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<(), Error> {
        self.api(namespace)
            .patch(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Merge patch replacing the finalizer list, pinned to the version it was
/// computed from so a concurrent change to the list fails with a conflict
fn finalizers_patch(user: &Open5GSUser, finalizers: Vec<String>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": user.metadata.resource_version,
        }
    })
}

/// Patch adding [`USER_FINALIZER`], or `None` when it is already there
fn finalizer_added_patch(user: &Open5GSUser) -> Option<serde_json::Value> {
    if has_finalizer(user) {
        return None;
    }
    let mut finalizers = user.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(USER_FINALIZER.to_string());
    Some(finalizers_patch(user, finalizers))
}

/// Patch dropping [`USER_FINALIZER`], or `None` when it is already gone
fn finalizer_removed_patch(user: &Open5GSUser) -> Option<serde_json::Value> {
    if !has_finalizer(user) {
        return None;
    }
    let finalizers = user
        .finalizers()
        .iter()
        .filter(|f| *f != USER_FINALIZER)
        .cloned()
        .collect();
    Some(finalizers_patch(user, finalizers))
}

#[async_trait]
impl UserClient for KubeUserClient {
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let user = self.api(namespace).get(name).await?;
        match finalizer_added_patch(&user) {
            Some(patch) => self.patch_finalizers(namespace, name, patch).await,
            None => Ok(()),
        }
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let Some(user) = self.api(namespace).get_opt(name).await? else {
            return Ok(());
        };
        match finalizer_removed_patch(&user) {
            Some(patch) => self.patch_finalizers(namespace, name, patch).await,
            None => Ok(()),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &Open5GSUserStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state of the Open5GSUser controller
pub struct UserContext {
    /// Writes against the user objects
    pub client: Arc<dyn UserClient>,
    /// Datastore address lookup
    pub resolver: Arc<dyn DatastoreResolver>,
    /// Datastore connections
    pub connector: Arc<dyn StoreConnector>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Delay before the next pass, whatever the outcome
    pub requeue: Duration,
}

impl UserContext {
    /// Create a context with the default requeue interval
    pub fn new(
        client: Arc<dyn UserClient>,
        resolver: Arc<dyn DatastoreResolver>,
        connector: Arc<dyn StoreConnector>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            client,
            resolver,
            connector,
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

fn has_finalizer(user: &Open5GSUser) -> bool {
    user.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == USER_FINALIZER))
}

/// Reconcile one Open5GSUser object
#[instrument(skip(user, ctx), fields(user = %user.name_any(), imsi = %user.spec.imsi))]
pub async fn reconcile(user: Arc<Open5GSUser>, ctx: Arc<UserContext>) -> Result<Action, Error> {
    let name = user.name_any();
    let namespace = user
        .namespace()
        .ok_or_else(|| Error::validation("Open5GSUser object has no namespace"))?;
    let deleting = user.meta().deletion_timestamp.is_some();

    match (deleting, has_finalizer(&user)) {
        (true, false) => {
            debug!("being deleted without our finalizer, nothing to do");
            Ok(Action::await_change())
        }
        (true, true) => {
            finalize(&user, &namespace, &ctx).await?;
            ctx.client.remove_finalizer(&namespace, &name).await?;
            info!("finalizer released");
            Ok(Action::await_change())
        }
        (false, registered) => {
            if !registered {
                ctx.client.add_finalizer(&namespace, &name).await?;
                debug!("finalizer registered");
            }
            sync(&user, &namespace, &ctx).await?;
            Ok(Action::requeue(ctx.requeue))
        }
    }
}

/// Error policy: the same fixed interval as a successful pass
pub fn error_policy(user: Arc<Open5GSUser>, error: &Error, ctx: Arc<UserContext>) -> Action {
    error!(
        ?error,
        user = %user.name_any(),
        retryable = error.is_retryable(),
        "subscriber reconciliation failed"
    );
    Action::requeue(ctx.requeue)
}

async fn sync(user: &Open5GSUser, namespace: &str, ctx: &UserContext) -> Result<(), Error> {
    let spec = &user.spec;

    let record = match spec.validate().and_then(|()| subscriber_document(spec)) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "invalid subscriber, not written");
            let status = unsynced(e.to_string());
            if report_status(user, namespace, ctx, status).await? {
                publish(
                    user,
                    ctx,
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    actions::SYNC,
                    e.to_string(),
                )
                .await;
            }
            return Ok(());
        }
    };

    let Some(uri) = ctx.resolver.resolve(&spec.open5gs, namespace).await? else {
        info!(open5gs = %spec.open5gs.name, "datastore not resolvable yet, skipping");
        let message = format!("datastore of Open5GS {} is not available", spec.open5gs.name);
        if report_status(user, namespace, ctx, unsynced(message.clone())).await? {
            publish(
                user,
                ctx,
                EventType::Warning,
                reasons::DATASTORE_UNAVAILABLE,
                actions::SYNC,
                message,
            )
            .await;
        }
        return Ok(());
    };

    let written = async {
        let store = ctx.connector.connect(&uri).await?;
        if store.find(&spec.imsi).await?.as_ref() == Some(&record) {
            debug!("datastore record already current");
            return Ok(());
        }
        store.upsert(&spec.imsi, record).await
    }
    .await;
    if let Err(e) = written {
        report_status(user, namespace, ctx, unsynced(e.to_string())).await?;
        return Err(e);
    }

    let synced = Open5GSUserStatus {
        synced: true,
        message: None,
    };
    if report_status(user, namespace, ctx, synced).await? {
        info!(datastore = %uri, "subscriber synced");
        publish(
            user,
            ctx,
            EventType::Normal,
            reasons::SUBSCRIBER_SYNCED,
            actions::SYNC,
            format!("subscriber {} written", spec.imsi),
        )
        .await;
    }
    Ok(())
}

/// Delete the record. An unresolvable datastore counts as already deleted
/// so a torn-down Open5GS object never blocks user removal.
async fn finalize(user: &Open5GSUser, namespace: &str, ctx: &UserContext) -> Result<(), Error> {
    let spec = &user.spec;
    let Some(uri) = ctx.resolver.resolve(&spec.open5gs, namespace).await? else {
        warn!(open5gs = %spec.open5gs.name, "datastore not resolvable, skipping record deletion");
        return Ok(());
    };

    let store = ctx.connector.connect(&uri).await?;
    let existed = store.delete(&spec.imsi).await?;
    info!(datastore = %uri, existed, "subscriber removed");
    publish(
        user,
        ctx,
        EventType::Normal,
        reasons::SUBSCRIBER_REMOVED,
        actions::FINALIZE,
        format!("subscriber {} removed", spec.imsi),
    )
    .await;
    Ok(())
}

fn unsynced(message: String) -> Open5GSUserStatus {
    Open5GSUserStatus {
        synced: false,
        message: Some(message),
    }
}

/// Patch status when it changed; returns whether it did
async fn report_status(
    user: &Open5GSUser,
    namespace: &str,
    ctx: &UserContext,
    status: Open5GSUserStatus,
) -> Result<bool, Error> {
    if user.status.as_ref() == Some(&status) {
        return Ok(false);
    }
    ctx.client
        .patch_status(namespace, &user.name_any(), &status)
        .await?;
    Ok(true)
}

async fn publish(
    user: &Open5GSUser,
    ctx: &UserContext,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&user.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

// =============================================================================
// Tests
// =============================================================================
