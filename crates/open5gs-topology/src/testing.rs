//! In-memory control plane for multi-pass tests
//!
//! Behaves like the API server where the engine can observe a difference:
//! uids and resource versions are assigned on write, stale versions conflict,
//! Services get a cluster IP, and lists honour equality label selectors.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;

use open5gs_common::crd::Open5GSStatus;
use open5gs_common::events::EventPublisher;
use open5gs_common::Error;

use crate::client::ControlPlane;
use crate::resources::{ManagedResource, ResourceKind};

type Key = (ResourceKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, ManagedResource>,
    next_version: u64,
    creates: usize,
    replaces: usize,
    deletes: usize,
    statuses: Vec<Open5GSStatus>,
    fail_kinds: Vec<(ResourceKind, u16)>,
}

/// Fake cluster shared by the engine and the test body
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<State>,
}

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (fake)"),
        reason: reason.to_string(),
        code,
    }))
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake state lock")
    }

    /// Put an object in place without counting it as a mutation
    pub fn seed(&self, resource: ManagedResource) {
        let mut state = self.lock();
        let key = key_of(&resource);
        let stored = state.stamp(resource);
        state.objects.insert(key, stored);
    }

    /// Make every call for `kind` fail with `code`
    pub fn fail(&self, kind: ResourceKind, code: u16) {
        self.lock().fail_kinds.push((kind, code));
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<ManagedResource> {
        self.lock()
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Total create, replace and delete calls so far
    pub fn mutations(&self) -> usize {
        let state = self.lock();
        state.creates + state.replaces + state.deletes
    }

    pub fn creates(&self) -> usize {
        self.lock().creates
    }

    pub fn replaces(&self) -> usize {
        self.lock().replaces
    }

    pub fn deletes(&self) -> usize {
        self.lock().deletes
    }

    pub fn statuses(&self) -> Vec<Open5GSStatus> {
        self.lock().statuses.clone()
    }

    /// Simulate another actor editing an object, bumping its version
    pub fn edit(&self, kind: ResourceKind, namespace: &str, name: &str, f: impl FnOnce(&mut ManagedResource)) {
        let mut state = self.lock();
        let key = (kind, namespace.to_string(), name.to_string());
        if let Some(mut resource) = state.objects.remove(&key) {
            f(&mut resource);
            let stored = state.bump(resource);
            state.objects.insert(key, stored);
        }
    }
}

impl State {
    fn check(&self, kind: ResourceKind) -> Result<(), Error> {
        match self.fail_kinds.iter().find(|(k, _)| *k == kind) {
            Some((_, code)) => Err(api_error(*code, "Injected")),
            None => Ok(()),
        }
    }

    fn bump(&mut self, mut resource: ManagedResource) -> ManagedResource {
        self.next_version += 1;
        resource.meta_mut().resource_version = Some(self.next_version.to_string());
        resource
    }

    fn stamp(&mut self, mut resource: ManagedResource) -> ManagedResource {
        let uid = format!("uid-{}-{}", resource.kind(), resource.name());
        resource.meta_mut().uid.get_or_insert(uid);
        if let ManagedResource::NetworkEndpoint(svc) = &mut resource {
            if let Some(spec) = svc.spec.as_mut() {
                if spec.cluster_ip.is_none() {
                    let ip = format!("10.96.0.{}", self.next_version % 250 + 1);
                    spec.cluster_ip = Some(ip.clone());
                    spec.cluster_ips = Some(vec![ip]);
                }
            }
        }
        self.bump(resource)
    }
}

fn key_of(resource: &ManagedResource) -> Key {
    (
        resource.kind(),
        resource.namespace().to_string(),
        resource.name().to_string(),
    )
}

fn matches(resource: &ManagedResource, selector: &str) -> bool {
    let labels = resource.meta().labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, Error> {
        let state = self.lock();
        state.check(kind)?;
        Ok(state
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, Error> {
        let state = self.lock();
        state.check(kind)?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), r)| *k == kind && ns == namespace && matches(r, selector))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, Error> {
        let mut state = self.lock();
        state.check(resource.kind())?;
        let key = key_of(resource);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.creates += 1;
        let stored = state.stamp(resource.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, resource: &ManagedResource) -> Result<ManagedResource, Error> {
        let mut state = self.lock();
        state.check(resource.kind())?;
        let key = key_of(resource);
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if current.meta().resource_version != resource.meta().resource_version {
            return Err(api_error(409, "Conflict"));
        }
        state.replaces += 1;
        let stored = state.bump(resource.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<(), Error> {
        let mut state = self.lock();
        state.check(resource.kind())?;
        let key = key_of(resource);
        let Some(current) = state.objects.get(&key) else {
            return Ok(());
        };
        if let Some(uid) = &resource.meta().uid {
            if current.meta().uid.as_ref() != Some(uid) {
                return Err(api_error(409, "Conflict"));
            }
        }
        state.objects.remove(&key);
        state.deletes += 1;
        Ok(())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &Open5GSStatus,
    ) -> Result<(), Error> {
        self.lock().statuses.push(status.clone());
        Ok(())
    }
}

/// One event as the controller published it
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: String,
}

/// Event publisher that keeps everything it is given
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().expect("events lock").push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.unwrap_or_default(),
        });
    }
}
