//! Component catalogue
//!
//! One descriptor per network function (plus the datastore) replaces the
//! per-component builders. The compiler and the teardown path both read this
//! table, so adding a port or an env var happens in exactly one place.

use std::fmt;

/// Port carried by every metrics-capable component
pub const METRICS_PORT: i32 = 9090;

/// Port every network function serves its SBI on
pub const SBI_PORT: i32 = 7777;

/// Datastore port inside the cluster
pub const MONGODB_PORT: i32 = 27017;

/// The fixed set of components an Open5GS object can run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// Access and mobility management
    Amf,
    /// Authentication server
    Ausf,
    /// Binding support
    Bsf,
    /// NF repository
    Nrf,
    /// Network slice selection
    Nssf,
    /// Session management
    Smf,
    /// Policy control
    Pcf,
    /// Service communication proxy
    Scp,
    /// Unified data management
    Udm,
    /// Unified data repository
    Udr,
    /// User plane
    Upf,
    /// Subscriber management web console
    WebUi,
    /// Subscriber datastore
    MongoDb,
}

impl ComponentKind {
    /// Every component, in reconcile order
    pub const ALL: [ComponentKind; 13] = [
        ComponentKind::Amf,
        ComponentKind::Ausf,
        ComponentKind::Bsf,
        ComponentKind::Nrf,
        ComponentKind::Nssf,
        ComponentKind::Smf,
        ComponentKind::Pcf,
        ComponentKind::Scp,
        ComponentKind::Udm,
        ComponentKind::Udr,
        ComponentKind::Upf,
        ComponentKind::WebUi,
        ComponentKind::MongoDb,
    ];

    /// Lowercase name used in resource names and labels
    pub fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Position in [`ComponentKind::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Static description of what this component deploys
    pub fn descriptor(&self) -> &'static ComponentDescriptor {
        &CATALOGUE[self.index()]
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// L4 protocol of an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// SCTP (NGAP)
    Sctp,
}

impl Protocol {
    /// Kubernetes protocol string
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }
}

/// A named port the component listens on and publishes as a Service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Port name, also the Service name suffix
    pub name: &'static str,
    /// Container and Service port
    pub port: i32,
    /// L4 protocol
    pub protocol: Protocol,
    /// Whether the user may change the exposure type
    pub overridable: bool,
}

const fn endpoint(name: &'static str, port: i32, protocol: Protocol) -> EndpointSpec {
    EndpointSpec {
        name,
        port,
        protocol,
        overridable: false,
    }
}

const fn exposed(name: &'static str, port: i32, protocol: Protocol) -> EndpointSpec {
    EndpointSpec {
        name,
        port,
        protocol,
        overridable: true,
    }
}

/// Metrics endpoint added when metrics are enabled on a capable component
pub const METRICS_ENDPOINT: EndpointSpec = endpoint("metrics", METRICS_PORT, Protocol::Tcp);

const SBI: EndpointSpec = endpoint("sbi", SBI_PORT, Protocol::Tcp);

/// Which image reference a component runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// `open5gsImage`
    Core,
    /// `webuiImage`
    WebUi,
    /// `mongoDBVersion`
    Datastore,
}

/// Per-component defaults for unset flags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureDefaults {
    /// Default for `enabled`
    pub enabled: bool,
    /// Default for `metrics`
    pub metrics: bool,
    /// Default for `serviceMonitor`
    pub service_monitor: bool,
    /// Default for `serviceAccount`
    pub service_account: bool,
}

const ON: FeatureDefaults = FeatureDefaults {
    enabled: true,
    metrics: false,
    service_monitor: false,
    service_account: false,
};

const ON_WITH_METRICS: FeatureDefaults = FeatureDefaults {
    enabled: true,
    metrics: true,
    service_monitor: false,
    service_account: false,
};

const OFF: FeatureDefaults = FeatureDefaults {
    enabled: false,
    metrics: false,
    service_monitor: false,
    service_account: false,
};

/// Static description of a component
#[derive(Debug)]
pub struct ComponentDescriptor {
    /// The component this row describes
    pub kind: ComponentKind,
    /// Lowercase name
    pub name: &'static str,
    /// Container argument (daemon binary); `None` keeps the image entrypoint
    pub command: Option<&'static str>,
    /// Image reference to run
    pub image: ImageSource,
    /// Endpoints, excluding metrics
    pub endpoints: &'static [EndpointSpec],
    /// Receives `DB_URI` pointing at the datastore
    pub uses_datastore: bool,
    /// Can expose a metrics endpoint
    pub metrics_capable: bool,
    /// Storage request for a persistent claim, if the component needs one
    pub storage: Option<&'static str>,
    /// Defaults applied by the normalizer
    pub defaults: FeatureDefaults,
}

impl ComponentDescriptor {
    /// Look up an endpoint by name
    pub fn endpoint(&self, name: &str) -> Option<&'static EndpointSpec> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Whether this component serves the SBI (used for TCP probes)
    pub fn serves_sbi(&self) -> bool {
        self.endpoint("sbi").is_some()
    }
}

/// Catalogue indexed by `ComponentKind as usize`
static CATALOGUE: [ComponentDescriptor; 13] = [
    ComponentDescriptor {
        kind: ComponentKind::Amf,
        name: "amf",
        command: Some("open5gs-amfd"),
        image: ImageSource::Core,
        endpoints: &[SBI, exposed("ngap", 38412, Protocol::Sctp)],
        uses_datastore: false,
        metrics_capable: true,
        storage: None,
        defaults: ON_WITH_METRICS,
    },
    ComponentDescriptor {
        kind: ComponentKind::Ausf,
        name: "ausf",
        command: Some("open5gs-ausfd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Bsf,
        name: "bsf",
        command: Some("open5gs-bsfd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Nrf,
        name: "nrf",
        command: Some("open5gs-nrfd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Nssf,
        name: "nssf",
        command: Some("open5gs-nssfd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Smf,
        name: "smf",
        command: Some("open5gs-smfd"),
        image: ImageSource::Core,
        endpoints: &[
            SBI,
            endpoint("gtpc", 2123, Protocol::Udp),
            endpoint("gtpu", 2152, Protocol::Udp),
            exposed("pfcp", 8805, Protocol::Udp),
        ],
        uses_datastore: false,
        metrics_capable: true,
        storage: None,
        defaults: ON_WITH_METRICS,
    },
    ComponentDescriptor {
        kind: ComponentKind::Pcf,
        name: "pcf",
        command: Some("open5gs-pcfd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: true,
        metrics_capable: true,
        storage: None,
        defaults: ON_WITH_METRICS,
    },
    ComponentDescriptor {
        kind: ComponentKind::Scp,
        name: "scp",
        command: Some("open5gs-scpd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Udm,
        name: "udm",
        command: Some("open5gs-udmd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: false,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Udr,
        name: "udr",
        command: Some("open5gs-udrd"),
        image: ImageSource::Core,
        endpoints: &[SBI],
        uses_datastore: true,
        metrics_capable: false,
        storage: None,
        defaults: ON,
    },
    ComponentDescriptor {
        kind: ComponentKind::Upf,
        name: "upf",
        command: Some("open5gs-upfd"),
        image: ImageSource::Core,
        endpoints: &[
            exposed("pfcp", 8805, Protocol::Udp),
            exposed("gtpu", 2152, Protocol::Udp),
        ],
        uses_datastore: false,
        metrics_capable: true,
        storage: None,
        defaults: ON_WITH_METRICS,
    },
    ComponentDescriptor {
        kind: ComponentKind::WebUi,
        name: "webui",
        command: None,
        image: ImageSource::WebUi,
        endpoints: &[exposed("http", 9999, Protocol::Tcp)],
        uses_datastore: true,
        metrics_capable: false,
        storage: None,
        defaults: OFF,
    },
    ComponentDescriptor {
        kind: ComponentKind::MongoDb,
        name: "mongodb",
        command: None,
        image: ImageSource::Datastore,
        endpoints: &[endpoint("mongodb", MONGODB_PORT, Protocol::Tcp)],
        uses_datastore: false,
        metrics_capable: false,
        storage: Some("8Gi"),
        defaults: ON,
    },
];

/// `{parent}-{component}`: config bundle, workload, claim, identity and monitor name
pub fn resource_name(parent: &str, component: ComponentKind) -> String {
    format!("{}-{}", parent, component.name())
}

/// `{parent}-{component}-{endpoint}`: Service name of one endpoint.
///
/// An endpoint named after its component drops the suffix, so the datastore
/// is reachable as `{parent}-mongodb`.
pub fn endpoint_service_name(parent: &str, component: ComponentKind, endpoint: &str) -> String {
    if endpoint == component.name() {
        resource_name(parent, component)
    } else {
        format!("{}-{}-{}", parent, component.name(), endpoint)
    }
}

/// In-cluster datastore URI handed to components through `DB_URI`
pub fn datastore_uri(parent: &str) -> String {
    format!(
        "mongodb://{}/{}",
        resource_name(parent, ComponentKind::MongoDb),
        open5gs_common::SUBSCRIBER_DATABASE
    )
}
