//! Open5GS CRD types
//!
//! Defines `Open5GS`, the declared topology of a 5G core. Every field is
//! optional on the wire; the topology crate normalizes a spec into a fully
//! populated value before anything is compiled from it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Exposure
// =============================================================================

/// How a network endpoint is exposed outside the pod network
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExposureType {
    /// Reachable only inside the cluster
    #[default]
    ClusterIP,
    /// Exposed on every node
    NodePort,
    /// Exposed through a cloud load balancer
    LoadBalancer,
}

impl ExposureType {
    /// Parse a user-provided exposure string. Unknown values mean `ClusterIP`.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            Some("NodePort") => Self::NodePort,
            Some("LoadBalancer") => Self::LoadBalancer,
            _ => Self::ClusterIP,
        }
    }

    /// Service `spec.type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIP => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

impl std::fmt::Display for ExposureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint exposure override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointOverride {
    /// Endpoint name (e.g. `ngap`, `pfcp`, `gtpu`)
    pub name: String,

    /// `ClusterIP`, `NodePort` or `LoadBalancer`; anything else means `ClusterIP`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

// =============================================================================
// Network function settings
// =============================================================================

/// Toggles for a single network function. Unset flags take the per-component
/// default from the catalogue.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFunction {
    /// Run this component at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Expose a Prometheus metrics endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<bool>,

    /// Create a ServiceMonitor for the metrics endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<bool>,

    /// Run under a dedicated ServiceAccount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<bool>,

    /// Endpoint exposure overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<EndpointOverride>,
}

// =============================================================================
// Network configuration
// =============================================================================

/// A network slice (S-NSSAI)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Slice {
    /// Slice/service type
    #[serde(default)]
    pub sst: String,
    /// Slice differentiator
    #[serde(default)]
    pub sd: String,
}

/// PLMN and tracking-area parameters shared by every network function
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfiguration {
    /// Mobile country code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcc: Option<String>,
    /// Mobile network code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnc: Option<String>,
    /// AMF region id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// AMF set id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    /// Tracking area code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tac: Option<String>,
    /// Supported slices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slices: Option<Vec<Slice>>,
}

// =============================================================================
// CRD
// =============================================================================

/// Declared Open5GS core topology
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "net.gradiant.org",
    version = "v1",
    kind = "Open5GS",
    plural = "open5gses",
    shortname = "o5gs",
    namespaced,
    status = "Open5GSStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct Open5GSSpec {
    /// Access and mobility management
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amf: Option<NetworkFunction>,
    /// Authentication server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ausf: Option<NetworkFunction>,
    /// Binding support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsf: Option<NetworkFunction>,
    /// Subscriber datastore
    #[serde(default, rename = "mongoDB", skip_serializing_if = "Option::is_none")]
    pub mongodb: Option<NetworkFunction>,
    /// NF repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nrf: Option<NetworkFunction>,
    /// Network slice selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nssf: Option<NetworkFunction>,
    /// Policy control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcf: Option<NetworkFunction>,
    /// Service communication proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<NetworkFunction>,
    /// Session management
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smf: Option<NetworkFunction>,
    /// Unified data management
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udm: Option<NetworkFunction>,
    /// Unified data repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udr: Option<NetworkFunction>,
    /// User plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upf: Option<NetworkFunction>,
    /// Subscriber management web console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webui: Option<NetworkFunction>,

    /// Image for the web console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webui_image: Option<String>,
    /// Image for every network function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open5gs_image: Option<String>,
    /// Image for the datastore
    #[serde(default, rename = "mongoDBVersion", skip_serializing_if = "Option::is_none")]
    pub mongodb_version: Option<String>,

    /// PLMN, TAC and slice parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<CoreConfiguration>,
}

/// Observed state of an Open5GS deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Open5GSStatus {
    /// True when every component converged on the last pass
    #[serde(default)]
    pub ready: bool,

    /// Components that failed on the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
