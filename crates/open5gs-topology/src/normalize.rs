//! Spec normalization
//!
//! Turns a partially populated `Open5GSSpec` into a [`NormalizedSpec`] where
//! every flag, image and network parameter has a value. Pure: the input is
//! never modified.

use std::collections::BTreeMap;

use open5gs_common::crd::{CoreConfiguration, ExposureType, NetworkFunction, Open5GSSpec, Slice};

use crate::component::{ComponentKind, ImageSource};

/// Default image for every network function
pub const DEFAULT_CORE_IMAGE: &str = "docker.io/gradiant/open5gs:2.7.3";
/// Default image for the web console
pub const DEFAULT_WEBUI_IMAGE: &str = "docker.io/gradiant/open5gs-webui:2.7.3";
/// Default image for the datastore
pub const DEFAULT_DATASTORE_IMAGE: &str = "bitnami/mongodb:8.0.6-debian-12-r0";

/// Fully resolved settings of one component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentSettings {
    /// Run this component
    pub enabled: bool,
    /// Expose metrics (only honoured on metrics-capable components)
    pub metrics: bool,
    /// Create a metrics monitor
    pub service_monitor: bool,
    /// Run under a dedicated identity
    pub service_account: bool,
    /// Exposure per overridable endpoint name
    pub exposure: BTreeMap<String, ExposureType>,
}

impl ComponentSettings {
    /// Exposure of an endpoint, `ClusterIP` unless overridden
    pub fn exposure_of(&self, endpoint: &str) -> ExposureType {
        self.exposure.get(endpoint).copied().unwrap_or_default()
    }
}

/// PLMN/TAC/slice parameters with defaults applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkParameters {
    /// Mobile country code
    pub mcc: String,
    /// Mobile network code
    pub mnc: String,
    /// AMF region id
    pub region: String,
    /// AMF set id
    pub set: String,
    /// Tracking area code
    pub tac: String,
    /// Supported slices
    pub slices: Vec<SliceParameters>,
}

/// One slice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceParameters {
    /// Slice/service type
    pub sst: String,
    /// Slice differentiator
    pub sd: String,
}

/// Resolved image references
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Images {
    /// Network function image
    pub core: String,
    /// Web console image
    pub webui: String,
    /// Datastore image
    pub datastore: String,
}

impl Images {
    /// Image for a catalogue image source
    pub fn for_source(&self, source: ImageSource) -> &str {
        match source {
            ImageSource::Core => &self.core,
            ImageSource::WebUi => &self.webui,
            ImageSource::Datastore => &self.datastore,
        }
    }
}

/// A spec with no unset optional fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedSpec {
    components: Vec<ComponentSettings>,
    /// Network parameters
    pub network: NetworkParameters,
    /// Images
    pub images: Images,
}

impl NormalizedSpec {
    /// Settings of one component
    pub fn settings(&self, kind: ComponentKind) -> &ComponentSettings {
        &self.components[kind.index()]
    }
}

/// Fill every unset field with its documented default
pub fn normalize(spec: &Open5GSSpec) -> NormalizedSpec {
    let components = ComponentKind::ALL
        .iter()
        .map(|kind| normalize_component(*kind, declared(spec, *kind)))
        .collect();

    NormalizedSpec {
        components,
        network: normalize_network(spec.configuration.as_ref()),
        images: Images {
            core: non_empty_or(spec.open5gs_image.as_deref(), DEFAULT_CORE_IMAGE),
            webui: non_empty_or(spec.webui_image.as_deref(), DEFAULT_WEBUI_IMAGE),
            datastore: non_empty_or(spec.mongodb_version.as_deref(), DEFAULT_DATASTORE_IMAGE),
        },
    }
}

fn declared(spec: &Open5GSSpec, kind: ComponentKind) -> Option<&NetworkFunction> {
    match kind {
        ComponentKind::Amf => spec.amf.as_ref(),
        ComponentKind::Ausf => spec.ausf.as_ref(),
        ComponentKind::Bsf => spec.bsf.as_ref(),
        ComponentKind::Nrf => spec.nrf.as_ref(),
        ComponentKind::Nssf => spec.nssf.as_ref(),
        ComponentKind::Smf => spec.smf.as_ref(),
        ComponentKind::Pcf => spec.pcf.as_ref(),
        ComponentKind::Scp => spec.scp.as_ref(),
        ComponentKind::Udm => spec.udm.as_ref(),
        ComponentKind::Udr => spec.udr.as_ref(),
        ComponentKind::Upf => spec.upf.as_ref(),
        ComponentKind::WebUi => spec.webui.as_ref(),
        ComponentKind::MongoDb => spec.mongodb.as_ref(),
    }
}

fn normalize_component(kind: ComponentKind, declared: Option<&NetworkFunction>) -> ComponentSettings {
    let descriptor = kind.descriptor();
    let defaults = descriptor.defaults;
    let flag = |get: fn(&NetworkFunction) -> Option<bool>, default: bool| {
        declared.and_then(get).unwrap_or(default)
    };

    // Overrides for endpoints that cannot be re-exposed are dropped here so
    // the compiler never sees them.
    let exposure = declared
        .map(|nf| nf.service.as_slice())
        .unwrap_or_default()
        .iter()
        .filter(|o| descriptor.endpoint(&o.name).is_some_and(|e| e.overridable))
        .map(|o| {
            (
                o.name.clone(),
                ExposureType::parse_lenient(o.service_type.as_deref()),
            )
        })
        .collect();

    ComponentSettings {
        enabled: flag(|nf| nf.enabled, defaults.enabled),
        metrics: flag(|nf| nf.metrics, defaults.metrics),
        service_monitor: flag(|nf| nf.service_monitor, defaults.service_monitor),
        service_account: flag(|nf| nf.service_account, defaults.service_account),
        exposure,
    }
}

fn normalize_network(config: Option<&CoreConfiguration>) -> NetworkParameters {
    let field = |get: fn(&CoreConfiguration) -> Option<&String>, default: &str| {
        non_empty_or(config.and_then(get).map(String::as_str), default)
    };

    let slices = config
        .and_then(|c| c.slices.as_ref())
        .map(|s| s.iter().map(normalize_slice).collect())
        .unwrap_or_default();

    NetworkParameters {
        mcc: field(|c| c.mcc.as_ref(), "999"),
        mnc: field(|c| c.mnc.as_ref(), "70"),
        region: field(|c| c.region.as_ref(), "2"),
        set: field(|c| c.set.as_ref(), "1"),
        tac: field(|c| c.tac.as_ref(), "0001"),
        slices,
    }
}

fn normalize_slice(slice: &Slice) -> SliceParameters {
    SliceParameters {
        sst: slice.sst.clone(),
        sd: slice.sd.clone(),
    }
}

fn non_empty_or(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use open5gs_common::crd::EndpointOverride;

    #[test]
    fn empty_spec_follows_defaults_table() {
        let normalized = normalize(&Open5GSSpec::default());

        for kind in [
            ComponentKind::Amf,
            ComponentKind::Pcf,
            ComponentKind::Smf,
            ComponentKind::Upf,
        ] {
            let s = normalized.settings(kind);
            assert!(s.enabled && s.metrics, "{kind}");
            assert!(!s.service_monitor && !s.service_account, "{kind}");
        }
        for kind in [
            ComponentKind::Ausf,
            ComponentKind::Bsf,
            ComponentKind::Nrf,
            ComponentKind::Nssf,
            ComponentKind::Scp,
            ComponentKind::Udm,
            ComponentKind::Udr,
            ComponentKind::MongoDb,
        ] {
            let s = normalized.settings(kind);
            assert!(s.enabled && !s.metrics, "{kind}");
        }
        assert!(!normalized.settings(ComponentKind::WebUi).enabled);

        assert_eq!(normalized.images.core, DEFAULT_CORE_IMAGE);
        assert_eq!(normalized.images.webui, DEFAULT_WEBUI_IMAGE);
        assert_eq!(normalized.images.datastore, DEFAULT_DATASTORE_IMAGE);
        assert_eq!(normalized.network.mcc, "999");
        assert_eq!(normalized.network.mnc, "70");
        assert_eq!(normalized.network.tac, "0001");
        assert!(normalized.network.slices.is_empty());
    }

    #[test]
    fn declared_values_win_over_defaults() {
        let spec = Open5GSSpec {
            webui: Some(NetworkFunction {
                enabled: Some(true),
                service_account: Some(true),
                ..Default::default()
            }),
            amf: Some(NetworkFunction {
                metrics: Some(false),
                ..Default::default()
            }),
            open5gs_image: Some("registry.local/open5gs:dev".to_string()),
            configuration: Some(CoreConfiguration {
                mcc: Some("001".to_string()),
                tac: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let normalized = normalize(&spec);
        let webui = normalized.settings(ComponentKind::WebUi);
        assert!(webui.enabled && webui.service_account);
        let amf = normalized.settings(ComponentKind::Amf);
        assert!(amf.enabled && !amf.metrics);
        assert_eq!(normalized.images.core, "registry.local/open5gs:dev");
        assert_eq!(normalized.network.mcc, "001");
        // empty strings count as unset
        assert_eq!(normalized.network.tac, "0001");
    }

    #[test]
    fn only_overridable_endpoints_keep_overrides() {
        let spec = Open5GSSpec {
            upf: Some(NetworkFunction {
                service: vec![
                    EndpointOverride {
                        name: "gtpu".to_string(),
                        service_type: Some("NodePort".to_string()),
                    },
                    EndpointOverride {
                        name: "metrics".to_string(),
                        service_type: Some("LoadBalancer".to_string()),
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        let upf = normalize(&spec).settings(ComponentKind::Upf).clone();
        assert_eq!(upf.exposure_of("gtpu"), ExposureType::NodePort);
        assert_eq!(upf.exposure_of("metrics"), ExposureType::ClusterIP);
        assert_eq!(upf.exposure_of("pfcp"), ExposureType::ClusterIP);
        assert_eq!(upf.exposure.len(), 1);
    }

    #[test]
    fn normalization_does_not_touch_input() {
        let spec = Open5GSSpec::default();
        let before = spec.clone();
        let _ = normalize(&spec);
        assert_eq!(spec, before);
    }
}
