//! Log and span pipeline for the operator binary
//!
//! Reconcile logs are written to stdout as JSON lines. Setting
//! `OTEL_EXPORTER_OTLP_ENDPOINT` adds a second sink: the same spans are
//! batched to an OTLP collector over gRPC, with W3C TraceContext headers.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::OPERATOR_NAME;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,open5gs=debug,kube=info,tower=warn,hyper=warn";

/// Pod identity exposed through the downward API, as resource attributes
const POD_ATTRIBUTES: [(&str, &str); 2] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
];

/// Failure while installing telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span exporter could not be built
    #[error("OTLP exporter for {endpoint}: {message}")]
    Exporter {
        /// Collector endpoint
        endpoint: String,
        /// Underlying error
        message: String,
    },

    /// `RUST_LOG` does not parse as a filter
    #[error("log filter {filter:?}: {message}")]
    Filter {
        /// The offending filter string
        filter: String,
        /// Underlying error
        message: String,
    },

    /// A global subscriber is already installed
    #[error("tracing subscriber: {0}")]
    Subscriber(String),
}

/// Where logs and spans go
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute
    pub service_name: String,
    /// `EnvFilter` directives
    pub log_filter: String,
    /// OTLP collector, e.g. `http://otel-collector:4317`
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    /// Read `RUST_LOG` and `OTEL_EXPORTER_OTLP_ENDPOINT`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            service_name: OPERATOR_NAME.to_string(),
            log_filter: lookup("RUST_LOG")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Keeps the span exporter alive; flush it with [`Telemetry::shutdown`]
#[must_use]
pub struct Telemetry {
    provider: Option<TracerProvider>,
}

impl Telemetry {
    /// Whether spans leave the process
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Flush buffered spans before exit
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                warn!(error = %e, "span exporter did not shut down cleanly");
            }
        }
    }
}

/// Install the global subscriber described by `config`
pub fn init_telemetry(config: TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter).map_err(|e| TelemetryError::Filter {
        filter: config.log_filter.clone(),
        message: e.to_string(),
    })?;

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let resource = service_resource(&config.service_name, |key| std::env::var(key).ok());
            Some(span_provider(endpoint, resource)?)
        }
        None => None,
    };
    let spans = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(config.service_name.clone()))
    });

    let logs = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(logs)
        .with(spans)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(Telemetry { provider })
}

/// Resource attributes identifying this operator instance
fn service_resource(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];
    attributes.extend(
        POD_ATTRIBUTES
            .iter()
            .filter_map(|&(var, key)| lookup(var).map(|value| KeyValue::new(key, value))),
    );
    Resource::new(attributes)
}

fn span_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    Ok(provider)
}
