//! Open5GSUser CRD types
//!
//! A subscriber declared in the cluster and mirrored into the datastore of
//! the referenced Open5GS deployment.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

fn default_imsi() -> String {
    "999700000000001".to_string()
}

fn default_key() -> String {
    "465B5CE8B199B49FAA5F0A2EE238A6BC".to_string()
}

fn default_opc() -> String {
    "E8ED289DEBA952E4283B54E88E6183CA".to_string()
}

fn default_sd() -> String {
    "0x111111".to_string()
}

fn default_sst() -> String {
    "1".to_string()
}

fn default_apn() -> String {
    "internet".to_string()
}

fn default_open5gs_name() -> String {
    "open5gs".to_string()
}

/// Reference to the Open5GS deployment whose datastore holds this subscriber
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Open5GSRef {
    /// Name of the Open5GS object
    #[serde(default = "default_open5gs_name")]
    pub name: String,
    /// Namespace of the Open5GS object; empty means the user's own namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl Default for Open5GSRef {
    fn default() -> Self {
        Self {
            name: default_open5gs_name(),
            namespace: String::new(),
        }
    }
}

/// A subscriber identity provisioned into the core's datastore
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "net.gradiant.org",
    version = "v1",
    kind = "Open5GSUser",
    plural = "open5gsusers",
    shortname = "o5gsuser",
    namespaced,
    status = "Open5GSUserStatus",
    printcolumn = r#"{"name":"IMSI","type":"string","jsonPath":".spec.imsi"}"#,
    printcolumn = r#"{"name":"Synced","type":"boolean","jsonPath":".status.synced"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct Open5GSUserSpec {
    /// Subscriber IMSI, also the datastore key
    #[serde(default = "default_imsi")]
    pub imsi: String,
    /// Subscriber key K (hex)
    #[serde(default = "default_key")]
    pub key: String,
    /// Operator key OPc (hex)
    #[serde(default = "default_opc")]
    pub opc: String,
    /// Slice differentiator
    #[serde(default = "default_sd")]
    pub sd: String,
    /// Slice/service type
    #[serde(default = "default_sst")]
    pub sst: String,
    /// Data network name of the default session
    #[serde(default = "default_apn")]
    pub apn: String,
    /// Owning Open5GS deployment
    #[serde(default, rename = "open5gs")]
    pub open5gs: Open5GSRef,
}

impl Default for Open5GSUserSpec {
    fn default() -> Self {
        Self {
            imsi: default_imsi(),
            key: default_key(),
            opc: default_opc(),
            sd: default_sd(),
            sst: default_sst(),
            apn: default_apn(),
            open5gs: Open5GSRef::default(),
        }
    }
}

impl Open5GSUserSpec {
    /// Validate subscriber fields before they are written to the datastore
    pub fn validate(&self) -> Result<(), Error> {
        let imsi_ok = (5..=15).contains(&self.imsi.len())
            && self.imsi.chars().all(|c| c.is_ascii_digit());
        if !imsi_ok {
            return Err(Error::validation_for_field(
                "spec.imsi",
                format!("imsi '{}' must be 5 to 15 decimal digits", self.imsi),
            ));
        }

        for (field, value) in [("spec.key", &self.key), ("spec.opc", &self.opc)] {
            if value.len() != 32 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::validation_for_field(
                    field,
                    "must be 32 hexadecimal characters",
                ));
            }
        }

        if self.sst.parse::<u8>().is_err() {
            return Err(Error::validation_for_field(
                "spec.sst",
                format!("sst '{}' must be an integer between 0 and 255", self.sst),
            ));
        }

        let sd = self.sd_hex();
        if !sd.is_empty() && (sd.len() != 6 || !sd.chars().all(|c| c.is_ascii_hexdigit())) {
            return Err(Error::validation_for_field(
                "spec.sd",
                format!("sd '{}' must be 6 hexadecimal digits", self.sd),
            ));
        }

        Ok(())
    }

    /// Slice differentiator without the optional `0x` prefix
    pub fn sd_hex(&self) -> &str {
        self.sd
            .strip_prefix("0x")
            .or_else(|| self.sd.strip_prefix("0X"))
            .unwrap_or(&self.sd)
    }
}

/// Observed sync state of a subscriber
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Open5GSUserStatus {
    /// True when the datastore record matches the spec
    #[serde(default)]
    pub synced: bool,

    /// Reason the record is not in sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
