//! Common types for the Open5GS operator: CRDs, errors, events and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::Error;

/// Field manager and event reporter name
pub const OPERATOR_NAME: &str = "open5gs-operator";

/// Label carrying the owning Open5GS name
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Label carrying the lowercase component name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label marking metrics endpoints and monitors
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Pod-template annotation holding the config bundle fingerprint
pub const CONFIG_HASH_ANNOTATION: &str = "open5gs.gradiant.org/config-hash";

/// Database holding Open5GS subscribers
pub const SUBSCRIBER_DATABASE: &str = "open5gs";

/// Collection holding Open5GS subscribers
pub const SUBSCRIBER_COLLECTION: &str = "subscribers";

/// Default datastore port
pub const DEFAULT_DATASTORE_PORT: u16 = 27017;

/// Name of the datastore Service for an Open5GS object
pub fn datastore_service_name(open5gs_name: &str) -> String {
    format!("{}-mongodb", open5gs_name.to_lowercase())
}
