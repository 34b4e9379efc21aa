//! Capability probe for optional resource kinds
//!
//! The metrics monitor kind only exists when the Prometheus operator is
//! installed. The probe is asked once per reconcile pass and never cached,
//! since the operator can be installed or removed at any time.

use async_trait::async_trait;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use open5gs_common::Error;

use crate::resources::{ResourceKind, MONITOR_GROUP, MONITOR_KIND, MONITOR_VERSION};

/// Answers whether the cluster serves an optional resource kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// `Ok(false)` when the kind does not exist, `Err` for any other failure
    async fn is_supported(&self, kind: ResourceKind) -> Result<bool, Error>;
}

/// Probe backed by API discovery
pub struct KubeCapabilityProbe {
    client: Client,
}

impl KubeCapabilityProbe {
    /// Create a probe using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CapabilityProbe for KubeCapabilityProbe {
    async fn is_supported(&self, kind: ResourceKind) -> Result<bool, Error> {
        // Every other kind is core API
        if kind != ResourceKind::MetricsMonitor {
            return Ok(true);
        }

        let group_version = format!("{MONITOR_GROUP}/{MONITOR_VERSION}");
        match self
            .client
            .list_api_group_resources(&group_version)
            .await
            .map_err(Error::from)
        {
            Ok(list) => {
                let served = list.resources.iter().any(|r| r.kind == MONITOR_KIND);
                debug!(group_version = %group_version, served, "probed metrics monitor support");
                Ok(served)
            }
            Err(e) if e.is_not_found() => {
                debug!(group_version = %group_version, "metrics monitor group not served");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
