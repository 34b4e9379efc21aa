//! Ownership markers
//!
//! Every resource the engine creates carries a controller `OwnerReference`
//! to its Open5GS object. The same reference lets Kubernetes garbage-collect
//! the children when the parent goes away, and it is the only thing that
//! authorizes the engine to update or delete an existing resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use open5gs_common::crd::Open5GS;
use open5gs_common::Error;

/// Identity of the object that owns generated resources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    /// `apiVersion` of the owner
    pub api_version: String,
    /// `kind` of the owner
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Owner namespace
    pub namespace: String,
    /// Owner uid, the only field compared by [`owns`]
    pub uid: String,
}

impl Owner {
    /// Build the owner identity of an Open5GS object.
    ///
    /// Fails when the object has not been persisted yet (no uid).
    pub fn of(open5gs: &Open5GS) -> Result<Self, Error> {
        let uid = open5gs.uid().ok_or_else(|| {
            Error::internal_with_context("ownership", "Open5GS object has no uid")
        })?;
        Ok(Self {
            api_version: Open5GS::api_version(&()).to_string(),
            kind: Open5GS::kind(&()).to_string(),
            name: open5gs.name_any(),
            namespace: open5gs.namespace().unwrap_or_default(),
            uid,
        })
    }

    /// Controller reference pointing at this owner
    pub fn reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Attach the owner's controller reference.
///
/// Re-marking with the same owner leaves a single reference.
pub fn mark(meta: &mut ObjectMeta, owner: &Owner) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.reference());
}

/// True iff one of the resource's owner references has exactly the owner's uid
pub fn owns(meta: &ObjectMeta, owner: &Owner) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.uid == owner.uid)
}
